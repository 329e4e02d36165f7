// SPDX-License-Identifier: AGPL-3.0-only
//! Authorization engine. Pure given a policy snapshot, the connection identity and the request.

use crate::session::Identity;
use tacd_policy::{PolicyLookupError, PolicyStore, ReplyMode, Verdict};
use tacd_proto::{
    AUTHOR_STATUS_ERROR, AUTHOR_STATUS_FAIL, AUTHOR_STATUS_PASS_ADD, AUTHOR_STATUS_PASS_REPL,
    Attribute, AuthorizationRequest, AuthorizationResponse,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub response: AuthorizationResponse,
    pub matched_rule: Option<usize>,
    pub reason: &'static str,
}

impl AuthorizationDecision {
    fn new(status: u8, server_msg: &str, args: Vec<String>, reason: &'static str) -> Self {
        AuthorizationDecision {
            response: AuthorizationResponse {
                status,
                server_msg: server_msg.to_string(),
                data: String::new(),
                args,
            },
            matched_rule: None,
            reason,
        }
    }

    fn from_default(verdict: Verdict, deny_msg: &str, reason: &'static str) -> Self {
        if verdict.is_permit() {
            Self::new(AUTHOR_STATUS_PASS_ADD, "", Vec::new(), reason)
        } else {
            Self::new(AUTHOR_STATUS_FAIL, deny_msg, Vec::new(), reason)
        }
    }

    pub fn result_label(&self) -> &'static str {
        match self.response.status {
            AUTHOR_STATUS_PASS_ADD => "pass_add",
            AUTHOR_STATUS_PASS_REPL => "pass_repl",
            AUTHOR_STATUS_FAIL => "fail",
            _ => "error",
        }
    }
}

pub fn authorize(
    policy: &PolicyStore,
    identity: Option<&Identity>,
    request: &AuthorizationRequest,
) -> AuthorizationDecision {
    let Some(service_name) = request.service().filter(|s| !s.is_empty()) else {
        return AuthorizationDecision::new(
            AUTHOR_STATUS_ERROR,
            "service attribute required",
            Vec::new(),
            "missing service",
        );
    };

    let authenticated = identity.filter(|id| id.username == request.user);
    if authenticated.is_none() && policy.require_authentication() {
        return AuthorizationDecision::from_default(
            policy.default_authorization(),
            "not authenticated",
            "unauthenticated",
        );
    }

    let service = match policy.service_for(&request.user, &service_name) {
        Ok(service) => service,
        Err(PolicyLookupError::ServiceNotDefined { .. } | PolicyLookupError::UnknownUser(_)) => {
            return AuthorizationDecision::from_default(
                policy.default_authorization(),
                "service not defined",
                "service not defined",
            );
        }
        Err(PolicyLookupError::UnknownClient(_)) => {
            return AuthorizationDecision::new(AUTHOR_STATUS_ERROR, "", Vec::new(), "lookup error");
        }
    };

    if let Some(command) = request.command_string() {
        let rule = service.authorize_command(&command);
        let mut decision = if rule.allowed() {
            AuthorizationDecision::new(AUTHOR_STATUS_PASS_ADD, "", Vec::new(), "command permitted")
        } else {
            AuthorizationDecision::new(
                AUTHOR_STATUS_FAIL,
                "command denied",
                Vec::new(),
                "command denied",
            )
        };
        decision.matched_rule = rule.matched_rule;
        return decision;
    }

    let privilege = match authenticated {
        Some(id) => id.privilege,
        None => policy
            .user(&request.user)
            .map(|u| policy.privilege_for(u))
            .unwrap_or(tacd_policy::DEFAULT_PRIVILEGE),
    };
    let mut args = service.attributes.clone();
    let sets_privilege = args
        .iter()
        .filter_map(|a| Attribute::parse(a))
        .any(|a| a.name.eq_ignore_ascii_case("priv-lvl"));
    if !sets_privilege {
        args.push(format!("priv-lvl={privilege}"));
    }
    let status = match service.reply {
        ReplyMode::Add => AUTHOR_STATUS_PASS_ADD,
        ReplyMode::Replace => AUTHOR_STATUS_PASS_REPL,
    };
    AuthorizationDecision::new(status, "", args, "service start")
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "default_secret": "shared-secret",
        "users": [
            {
                "username": "readonly",
                "credential": { "cleartext": "viewer-pass" },
                "services": [
                    { "name": "shell", "default": "deny", "rules": [ { "verdict": "permit", "line": "show.*" } ] }
                ]
            },
            {
                "username": "netadmin",
                "credential": { "cleartext": "admin-pass" },
                "privilege": 15,
                "services": [
                    {
                        "name": "shell",
                        "default": "permit",
                        "reply": "replace",
                        "attributes": ["timeout*30"],
                        "rules": [
                            { "verdict": "deny", "line": "show running-config" },
                            { "verdict": "permit", "line": "show.*" }
                        ]
                    },
                    { "name": "exec", "attributes": ["priv-lvl=5"] }
                ]
            }
        ]
    }"#;

    fn store(require_authentication: bool, default: &str) -> PolicyStore {
        let mut doc: serde_json::Value = serde_json::from_str(POLICY).unwrap();
        doc["defaults"] = serde_json::json!({
            "authorization": default,
            "require_authentication": require_authentication,
        });
        PolicyStore::from_json_str(&doc.to_string()).unwrap()
    }

    fn identity(user: &str, privilege: u8) -> Identity {
        Identity {
            username: user.into(),
            privilege,
        }
    }

    fn command(user: &str, cmd: &str, args: &[&str]) -> AuthorizationRequest {
        let mut req = AuthorizationRequest::builder(11)
            .with_user(user)
            .with_service("shell")
            .with_cmd(cmd);
        for arg in args {
            req = req.add_cmd_arg(*arg);
        }
        req.add_cmd_arg("<cr>")
    }

    #[test]
    fn readonly_scenario() {
        let policy = store(true, "deny");
        let id = identity("readonly", 1);
        let configure = authorize(
            &policy,
            Some(&id),
            &command("readonly", "configure", &["terminal"]),
        );
        assert_eq!(configure.response.status, AUTHOR_STATUS_FAIL);
        assert_eq!(configure.matched_rule, None);

        let show = authorize(&policy, Some(&id), &command("readonly", "show", &["version"]));
        assert_eq!(show.response.status, AUTHOR_STATUS_PASS_ADD);
        assert!(show.response.args.is_empty());
        assert_eq!(show.matched_rule, Some(0));
    }

    #[test]
    fn first_matching_rule_wins() {
        let policy = store(true, "deny");
        let id = identity("netadmin", 15);
        let running = authorize(
            &policy,
            Some(&id),
            &command("netadmin", "show", &["running-config"]),
        );
        assert_eq!(running.response.status, AUTHOR_STATUS_FAIL);
        assert_eq!(running.matched_rule, Some(0));

        let interfaces = authorize(
            &policy,
            Some(&id),
            &command("netadmin", "show", &["interfaces"]),
        );
        assert_eq!(interfaces.response.status, AUTHOR_STATUS_PASS_ADD);
        assert_eq!(interfaces.matched_rule, Some(1));
    }

    #[test]
    fn permit_default_applies_when_no_rule_matches() {
        let policy = store(true, "deny");
        let id = identity("netadmin", 15);
        let reload = authorize(&policy, Some(&id), &command("netadmin", "reload", &[]));
        assert_eq!(reload.response.status, AUTHOR_STATUS_PASS_ADD);
        assert_eq!(reload.matched_rule, None);
    }

    #[test]
    fn service_start_returns_attributes_and_privilege() {
        let policy = store(true, "deny");
        let id = identity("netadmin", 15);
        let req = AuthorizationRequest::builder(3)
            .with_user("netadmin")
            .with_service("shell")
            .add_arg("cmd=");
        let decision = authorize(&policy, Some(&id), &req);
        assert_eq!(decision.response.status, AUTHOR_STATUS_PASS_REPL);
        assert_eq!(
            decision.response.args,
            vec!["timeout*30".to_string(), "priv-lvl=15".to_string()]
        );

        let exec = AuthorizationRequest::builder(3)
            .with_user("netadmin")
            .with_service("exec");
        let decision = authorize(&policy, Some(&id), &exec);
        assert_eq!(decision.response.status, AUTHOR_STATUS_PASS_ADD);
        assert_eq!(decision.response.args, vec!["priv-lvl=5".to_string()]);
    }

    #[test]
    fn missing_service_is_error() {
        let policy = store(true, "deny");
        let req = AuthorizationRequest::builder(3).with_user("netadmin").with_cmd("show");
        let decision = authorize(&policy, Some(&identity("netadmin", 15)), &req);
        assert_eq!(decision.response.status, AUTHOR_STATUS_ERROR);
        assert_eq!(decision.response.server_msg, "service attribute required");
    }

    #[test]
    fn unauthenticated_requests_follow_store_default() {
        let deny = store(true, "deny");
        let decision = authorize(&deny, None, &command("readonly", "show", &["version"]));
        assert_eq!(decision.response.status, AUTHOR_STATUS_FAIL);
        assert_eq!(decision.response.server_msg, "not authenticated");

        let mismatch = authorize(
            &deny,
            Some(&identity("netadmin", 15)),
            &command("readonly", "show", &["version"]),
        );
        assert_eq!(mismatch.response.status, AUTHOR_STATUS_FAIL);

        let permit_all = store(true, "permit");
        let decision = authorize(&permit_all, None, &command("readonly", "configure", &[]));
        assert_eq!(decision.response.status, AUTHOR_STATUS_PASS_ADD);
    }

    #[test]
    fn rules_apply_without_authentication_when_not_required() {
        let policy = store(false, "deny");
        let decision = authorize(&policy, None, &command("readonly", "show", &["clock"]));
        assert_eq!(decision.response.status, AUTHOR_STATUS_PASS_ADD);
        let decision = authorize(&policy, None, &command("readonly", "configure", &["terminal"]));
        assert_eq!(decision.response.status, AUTHOR_STATUS_FAIL);
    }

    #[test]
    fn undefined_service_fails() {
        let policy = store(true, "deny");
        let req = AuthorizationRequest::builder(3)
            .with_user("readonly")
            .with_service("ppp");
        let decision = authorize(&policy, Some(&identity("readonly", 1)), &req);
        assert_eq!(decision.response.status, AUTHOR_STATUS_FAIL);
        assert_eq!(decision.response.server_msg, "service not defined");
    }
}
