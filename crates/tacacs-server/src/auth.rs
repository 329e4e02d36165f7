// SPDX-License-Identifier: AGPL-3.0-only
//! Authentication engine: LOGIN via ASCII, PAP, and CHAP against a policy snapshot.

use crate::ascii::AsciiLogin;
use crate::session::Identity;
use openssl::rand::rand_bytes;
use tacd_policy::{CredentialCheck, PolicyStore};
use tacd_proto::{
    AUTHEN_ACTION_LOGIN, AUTHEN_STATUS_ERROR, AUTHEN_STATUS_FAIL, AUTHEN_STATUS_GETDATA,
    AUTHEN_STATUS_PASS, AUTHEN_TYPE_ASCII, AUTHEN_TYPE_CHAP, AUTHEN_TYPE_PAP, AuthenContinue,
    AuthenData, AuthenReply, AuthenStart, CHAP_RESPONSE_LEN,
};

/// Reply text shared by unknown users and wrong credentials.
pub const FAIL_MESSAGE: &str = "authentication failed";
pub const CHAP_CHALLENGE_LEN: usize = 16;

/// Work carried between rounds of one authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAuthen {
    Ascii(AsciiLogin),
    Chap {
        user: String,
        chap_id: u8,
        challenge: [u8; CHAP_CHALLENGE_LEN],
    },
}

impl PendingAuthen {
    pub fn method(&self) -> &'static str {
        match self {
            PendingAuthen::Ascii(_) => "ascii",
            PendingAuthen::Chap { .. } => "chap",
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            PendingAuthen::Ascii(AsciiLogin::AwaitPassword { user })
            | PendingAuthen::Chap { user, .. } => Some(user.as_str()),
            PendingAuthen::Ascii(AsciiLogin::AwaitUser) => None,
        }
    }
}

#[derive(Debug)]
pub struct AuthenOutcome {
    pub reply: AuthenReply,
    pub identity: Option<Identity>,
    pub pending: Option<PendingAuthen>,
    pub method: &'static str,
}

impl AuthenOutcome {
    pub fn prompt(method: &'static str, reply: AuthenReply, pending: PendingAuthen) -> Self {
        AuthenOutcome {
            reply,
            identity: None,
            pending: Some(pending),
            method,
        }
    }

    pub fn error(method: &'static str, msg: &str) -> Self {
        AuthenOutcome {
            reply: AuthenReply::new(AUTHEN_STATUS_ERROR, msg),
            identity: None,
            pending: None,
            method,
        }
    }

    pub fn fail(method: &'static str, msg: &str) -> Self {
        AuthenOutcome {
            reply: AuthenReply::new(AUTHEN_STATUS_FAIL, msg),
            identity: None,
            pending: None,
            method,
        }
    }

    /// Collapses a credential check into PASS or the uniform FAIL.
    pub fn from_check(
        method: &'static str,
        policy: &PolicyStore,
        check: CredentialCheck<'_>,
    ) -> Self {
        match check {
            CredentialCheck::Accepted(user) => AuthenOutcome {
                reply: AuthenReply::new(AUTHEN_STATUS_PASS, ""),
                identity: Some(Identity {
                    username: user.username.clone(),
                    privilege: policy.privilege_for(user),
                }),
                pending: None,
                method,
            },
            CredentialCheck::Rejected | CredentialCheck::UnknownUser => {
                AuthenOutcome::fail(method, FAIL_MESSAGE)
            }
        }
    }

    pub fn result_label(&self) -> &'static str {
        match self.reply.status {
            AUTHEN_STATUS_PASS => "pass",
            AUTHEN_STATUS_FAIL => "fail",
            AUTHEN_STATUS_ERROR => "error",
            _ => "continue",
        }
    }
}

pub fn method_name(authen_type: u8) -> &'static str {
    match authen_type {
        AUTHEN_TYPE_ASCII => "ascii",
        AUTHEN_TYPE_PAP => "pap",
        AUTHEN_TYPE_CHAP => "chap",
        _ => "unsupported",
    }
}

pub fn start(policy: &PolicyStore, start: &AuthenStart) -> AuthenOutcome {
    let method = method_name(start.authen_type);
    if start.action != AUTHEN_ACTION_LOGIN {
        return AuthenOutcome::error(method, "unsupported authentication action");
    }
    match start.authen_type {
        AUTHEN_TYPE_ASCII => AsciiLogin::begin(&start.user),
        AUTHEN_TYPE_PAP => start_pap(policy, start),
        AUTHEN_TYPE_CHAP => start_chap(policy, start),
        _ => AuthenOutcome::error(method, "unsupported authentication type"),
    }
}

pub fn resume(
    policy: &PolicyStore,
    pending: PendingAuthen,
    cont: &AuthenContinue,
) -> AuthenOutcome {
    match pending {
        PendingAuthen::Ascii(login) => login.advance(policy, cont),
        PendingAuthen::Chap {
            user,
            chap_id,
            challenge,
        } => {
            if cont.is_abort() {
                return AuthenOutcome::fail("chap", "authentication aborted");
            }
            let payload = if cont.data.is_empty() {
                &cont.user_msg
            } else {
                &cont.data
            };
            if payload.len() != 1 + CHAP_RESPONSE_LEN {
                return AuthenOutcome::error("chap", "invalid CHAP continue length");
            }
            let check = policy.check_chap(&user, chap_id, &challenge, &payload[1..]);
            if payload[0] != chap_id {
                return AuthenOutcome::fail("chap", FAIL_MESSAGE);
            }
            AuthenOutcome::from_check("chap", policy, check)
        }
    }
}

fn start_pap(policy: &PolicyStore, start: &AuthenStart) -> AuthenOutcome {
    if start.user.is_empty() {
        return AuthenOutcome::error("pap", "username required");
    }
    let AuthenData::Pap { password } = start.parsed_data() else {
        return AuthenOutcome::error("pap", "malformed PAP data");
    };
    let check = policy.check_password(&start.user, &password);
    AuthenOutcome::from_check("pap", policy, check)
}

fn start_chap(policy: &PolicyStore, start: &AuthenStart) -> AuthenOutcome {
    if start.user.is_empty() {
        return AuthenOutcome::error("chap", "username required");
    }
    match start.parsed_data() {
        AuthenData::Chap {
            chap_id,
            challenge,
            response,
        } => {
            let check = policy.check_chap(&start.user, chap_id, &challenge, &response);
            AuthenOutcome::from_check("chap", policy, check)
        }
        AuthenData::ChapIdOnly { chap_id } => {
            let mut challenge = [0u8; CHAP_CHALLENGE_LEN];
            if rand_bytes(&mut challenge).is_err() {
                return AuthenOutcome::error("chap", "challenge generation failed");
            }
            let mut reply = AuthenReply::new(AUTHEN_STATUS_GETDATA, "");
            reply.data = challenge.to_vec();
            AuthenOutcome::prompt(
                "chap",
                reply,
                PendingAuthen::Chap {
                    user: start.user.clone(),
                    chap_id,
                    challenge,
                },
            )
        }
        _ => AuthenOutcome::error("chap", "malformed CHAP data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacd_policy::chap_digest;
    use tacd_proto::{AUTHEN_ACTION_CHPASS, AUTHEN_SVC_LOGIN, Header, TYPE_AUTHEN, VERSION};

    fn policy() -> PolicyStore {
        PolicyStore::from_json_str(
            r#"{
                "default_secret": "shared-secret",
                "users": [
                    { "username": "alice", "credential": { "cleartext": "wonderland" }, "privilege": 7 }
                ]
            }"#,
        )
        .unwrap()
    }

    fn header(seq_no: u8) -> Header {
        Header {
            version: VERSION,
            packet_type: TYPE_AUTHEN,
            seq_no,
            flags: 0,
            session_id: 99,
            length: 0,
        }
    }

    fn start_packet(authen_type: u8, user: &str, data: &[u8]) -> AuthenStart {
        AuthenStart {
            header: header(1),
            action: AUTHEN_ACTION_LOGIN,
            priv_lvl: 1,
            authen_type,
            service: AUTHEN_SVC_LOGIN,
            user: user.into(),
            port: "tty0".into(),
            rem_addr: "198.51.100.2".into(),
            data: data.to_vec(),
        }
    }

    fn cont(data: &[u8]) -> AuthenContinue {
        AuthenContinue {
            header: header(3),
            user_msg: Vec::new(),
            data: data.to_vec(),
            flags: 0,
        }
    }

    #[test]
    fn pap_pass_carries_privilege() {
        let policy = policy();
        let outcome = start(&policy, &start_packet(AUTHEN_TYPE_PAP, "alice", b"wonderland"));
        assert_eq!(outcome.reply.status, AUTHEN_STATUS_PASS);
        assert_eq!(
            outcome.identity,
            Some(Identity {
                username: "alice".into(),
                privilege: 7
            })
        );
    }

    #[test]
    fn unknown_user_and_bad_password_look_identical() {
        let policy = policy();
        let unknown = start(&policy, &start_packet(AUTHEN_TYPE_PAP, "mallory", b"wonderland"));
        let wrong = start(&policy, &start_packet(AUTHEN_TYPE_PAP, "alice", b"guess"));
        assert_eq!(unknown.reply, wrong.reply);
        assert_eq!(unknown.reply.status, AUTHEN_STATUS_FAIL);
        assert_eq!(unknown.reply.server_msg, FAIL_MESSAGE);
        assert!(unknown.identity.is_none() && wrong.identity.is_none());
    }

    #[test]
    fn chap_inline_response() {
        let policy = policy();
        let challenge = [0x42u8; 16];
        let mut data = vec![5u8];
        data.extend_from_slice(&challenge);
        data.extend_from_slice(&chap_digest(5, b"wonderland", &challenge).unwrap());
        let outcome = start(&policy, &start_packet(AUTHEN_TYPE_CHAP, "alice", &data));
        assert_eq!(outcome.reply.status, AUTHEN_STATUS_PASS);
    }

    #[test]
    fn chap_server_challenge_round() {
        let policy = policy();
        let first = start(&policy, &start_packet(AUTHEN_TYPE_CHAP, "alice", &[9]));
        assert_eq!(first.reply.status, AUTHEN_STATUS_GETDATA);
        assert_eq!(first.reply.data.len(), CHAP_CHALLENGE_LEN);
        let pending = first.pending.unwrap();

        let mut answer = vec![9u8];
        answer.extend_from_slice(&chap_digest(9, b"wonderland", &first.reply.data).unwrap());
        let second = resume(&policy, pending.clone(), &cont(&answer));
        assert_eq!(second.reply.status, AUTHEN_STATUS_PASS);

        answer[0] = 10;
        let mismatched = resume(&policy, pending, &cont(&answer));
        assert_eq!(mismatched.reply.status, AUTHEN_STATUS_FAIL);
    }

    #[test]
    fn unsupported_action_is_error() {
        let policy = policy();
        let mut packet = start_packet(AUTHEN_TYPE_PAP, "alice", b"wonderland");
        packet.action = AUTHEN_ACTION_CHPASS;
        let outcome = start(&policy, &packet);
        assert_eq!(outcome.reply.status, AUTHEN_STATUS_ERROR);
        assert!(outcome.pending.is_none());
    }

    #[test]
    fn pap_without_username_is_error() {
        let policy = policy();
        let outcome = start(&policy, &start_packet(AUTHEN_TYPE_PAP, "", b"wonderland"));
        assert_eq!(outcome.reply.status, AUTHEN_STATUS_ERROR);
    }
}
