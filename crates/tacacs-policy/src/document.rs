// SPDX-License-Identifier: AGPL-3.0-only
//! Serde model of the policy file. Nothing here is validated; see `PolicyStore::from_document`.

use crate::rules::{ReplyMode, Verdict};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub client_groups: BTreeMap<String, ClientGroupConfig>,
    #[serde(default)]
    pub default_secret: Option<String>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
}

/// A single network device. Without its own secret it inherits the group's.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub address: IpAddr,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientGroupConfig {
    pub secret: String,
    #[serde(default)]
    pub members: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub username: String,
    pub credential: CredentialConfig,
    #[serde(default)]
    pub privilege: Option<u8>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// `{"cleartext": "..."}` or `{"argon2": "$argon2id$v=19$..."}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialConfig {
    Cleartext(String),
    Argon2(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub privilege: Option<u8>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub default: Verdict,
    #[serde(default)]
    pub reply: ReplyMode,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Exactly one of `command` or `line` must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub verdict: Verdict,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub line: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub authorization: Verdict,
    #[serde(default = "default_true")]
    pub require_authentication: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        DefaultsConfig {
            authorization: Verdict::Deny,
            require_authentication: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountingConfig {
    #[serde(default)]
    pub require_sink: bool,
}

fn default_true() -> bool {
    true
}
