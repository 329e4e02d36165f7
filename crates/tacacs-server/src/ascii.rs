// SPDX-License-Identifier: AGPL-3.0-only
//! Interactive ASCII login: GETUSER / GETPASS prompts driven by CONTINUE answers.

use crate::auth::{AuthenOutcome, PendingAuthen};
use tacd_policy::PolicyStore;
use tacd_proto::{
    AUTHEN_FLAG_NOECHO, AUTHEN_STATUS_GETPASS, AUTHEN_STATUS_GETUSER, AuthenContinue, AuthenReply,
};

pub const USERNAME_PROMPT: &str = "Username: ";
pub const PASSWORD_PROMPT: &str = "Password: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsciiLogin {
    AwaitUser,
    AwaitPassword { user: String },
}

impl AsciiLogin {
    /// The user may already be known from the START packet.
    pub fn begin(user: &str) -> AuthenOutcome {
        if user.is_empty() {
            AsciiLogin::AwaitUser.prompt()
        } else {
            AsciiLogin::AwaitPassword {
                user: user.to_string(),
            }
            .prompt()
        }
    }

    pub fn advance(self, policy: &PolicyStore, cont: &AuthenContinue) -> AuthenOutcome {
        if cont.is_abort() {
            return AuthenOutcome::fail("ascii", "authentication aborted");
        }
        let answer = cont.answer();
        match self {
            AsciiLogin::AwaitUser => {
                let user = String::from_utf8_lossy(answer).trim_end().to_string();
                if user.is_empty() {
                    return AsciiLogin::AwaitUser.prompt();
                }
                AsciiLogin::AwaitPassword { user }.prompt()
            }
            AsciiLogin::AwaitPassword { user } => {
                if answer.is_empty() {
                    return AsciiLogin::AwaitPassword { user }.prompt();
                }
                let check = policy.check_password(&user, answer);
                AuthenOutcome::from_check("ascii", policy, check)
            }
        }
    }

    fn prompt(self) -> AuthenOutcome {
        let reply = match &self {
            AsciiLogin::AwaitUser => AuthenReply::new(AUTHEN_STATUS_GETUSER, USERNAME_PROMPT),
            AsciiLogin::AwaitPassword { .. } => AuthenReply {
                flags: AUTHEN_FLAG_NOECHO,
                ..AuthenReply::new(AUTHEN_STATUS_GETPASS, PASSWORD_PROMPT)
            },
        };
        AuthenOutcome::prompt("ascii", reply, PendingAuthen::Ascii(self))
    }
}
