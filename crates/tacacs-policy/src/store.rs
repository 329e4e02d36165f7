// SPDX-License-Identifier: AGPL-3.0-only
//! Compiled, immutable policy. A new store is built for every reload; nothing mutates one in place.

use anyhow::{Context, Result, anyhow, bail, ensure};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use crate::credential::{Credential, CredentialVerifier, StoredCredentialVerifier};
use crate::document::{GroupConfig, PolicyDocument, ServiceConfig, UserConfig};
use crate::error::{ConfigLoadError, PolicyLookupError};
use crate::rules::{CommandRule, ReplyMode, RuleDecision, Verdict, evaluate};

pub const MAX_PRIVILEGE: u8 = 15;
pub const DEFAULT_PRIVILEGE: u8 = 1;

const CLEARTEXT_DECOY: &[u8] = b"tacd-decoy-credential";

#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub default: Verdict,
    pub reply: ReplyMode,
    pub attributes: Vec<String>,
    pub rules: Vec<CommandRule>,
}

impl Service {
    pub fn authorize_command(&self, command: &str) -> RuleDecision {
        evaluate(&self.rules, self.default, command)
    }

    fn compile(config: &ServiceConfig) -> Result<Service> {
        ensure!(!config.name.trim().is_empty(), "service name is empty");
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                CommandRule::compile(rule).with_context(|| format!("rule #{idx}"))
            })
            .collect::<Result<Vec<_>>>()?;
        for attr in &config.attributes {
            ensure!(
                attr.find(&['=', '*'][..]).is_some_and(|idx| idx > 0),
                "attribute {attr:?} must be name=value or name*value"
            );
        }
        Ok(Service {
            name: config.name.to_ascii_lowercase(),
            default: config.default,
            reply: config.reply,
            attributes: config.attributes.clone(),
            rules,
        })
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub credential: Credential,
    pub privilege: Option<u8>,
    pub groups: Vec<String>,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub privilege: Option<u8>,
    pub services: Vec<Service>,
}

/// Outcome of a credential check. Callers must answer `Rejected` and `UnknownUser` identically.
#[derive(Debug)]
pub enum CredentialCheck<'a> {
    Accepted(&'a User),
    Rejected,
    UnknownUser,
}

impl CredentialCheck<'_> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CredentialCheck::Accepted(_))
    }
}

#[derive(Debug)]
pub struct PolicyStore {
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    client_secrets: HashMap<IpAddr, Vec<u8>>,
    default_secret: Option<Vec<u8>>,
    default_authorization: Verdict,
    require_authentication: bool,
    require_accounting_sink: bool,
    /// One credential per scheme present in the store, cleartext always first.
    decoys: Vec<Credential>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl PolicyStore {
    pub fn from_document(document: PolicyDocument) -> Result<Self, ConfigLoadError> {
        Ok(Self::compile(document)?)
    }

    fn compile(document: PolicyDocument) -> Result<Self> {
        let mut groups = HashMap::with_capacity(document.groups.len());
        for config in &document.groups {
            let group = compile_group(config).with_context(|| format!("group {:?}", config.name))?;
            if groups.insert(group.name.clone(), group).is_some() {
                bail!("duplicate group {:?}", config.name);
            }
        }

        let mut users = HashMap::with_capacity(document.users.len());
        let mut decoys = vec![Credential::Cleartext(CLEARTEXT_DECOY.to_vec())];
        for config in &document.users {
            let user = compile_user(config, &groups)
                .with_context(|| format!("user {:?}", config.username))?;
            if !decoys.iter().any(|d| d.scheme() == user.credential.scheme()) {
                decoys.push(user.credential.clone());
            }
            if users.insert(user.username.clone(), user).is_some() {
                bail!("duplicate user {:?}", config.username);
            }
        }

        let client_secrets = compile_client_secrets(&document)?;
        let default_secret = match document.default_secret {
            Some(secret) if secret.is_empty() => bail!("default_secret is empty"),
            Some(secret) => Some(secret.into_bytes()),
            None => None,
        };

        Ok(PolicyStore {
            users,
            groups,
            client_secrets,
            default_secret,
            default_authorization: document.defaults.authorization,
            require_authentication: document.defaults.require_authentication,
            require_accounting_sink: document.accounting.require_sink,
            decoys,
            verifier: Arc::new(StoredCredentialVerifier),
        })
    }

    /// Swaps in a different verifier, e.g. one backed by an external identity provider.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Client entry first, then client-group membership, then the default secret.
    pub fn secret_for(&self, peer: IpAddr) -> Result<&[u8], PolicyLookupError> {
        let peer = peer.to_canonical();
        self.client_secrets
            .get(&peer)
            .or(self.default_secret.as_ref())
            .map(Vec::as_slice)
            .ok_or(PolicyLookupError::UnknownClient(peer))
    }

    pub fn user(&self, username: &str) -> Result<&User, PolicyLookupError> {
        self.users
            .get(username)
            .ok_or_else(|| PolicyLookupError::UnknownUser(username.to_string()))
    }

    /// Runs one verification per credential scheme in the store whether or not the
    /// user exists, so a miss costs the same as a wrong password.
    pub fn check_password(&self, username: &str, password: &[u8]) -> CredentialCheck<'_> {
        let user = self.users.get(username);
        let accepted = user
            .map(|user| self.verifier.verify_password(&user.credential, password))
            .unwrap_or(false);
        for decoy in self.decoys_besides(user) {
            let _ = self.verifier.verify_password(decoy, password);
        }
        match user {
            Some(user) if accepted => CredentialCheck::Accepted(user),
            Some(_) => CredentialCheck::Rejected,
            None => CredentialCheck::UnknownUser,
        }
    }

    pub fn check_chap(
        &self,
        username: &str,
        chap_id: u8,
        challenge: &[u8],
        response: &[u8],
    ) -> CredentialCheck<'_> {
        let user = self.users.get(username);
        let accepted = user
            .map(|user| self.verifier.verify_chap(&user.credential, chap_id, challenge, response))
            .unwrap_or(false);
        // CHAP only does work against cleartext; hashed users pay for the cleartext decoy.
        if let Some(decoy) = self.decoys_besides(user).find(|d| d.scheme() == "cleartext") {
            let _ = self.verifier.verify_chap(decoy, chap_id, challenge, response);
        }
        match user {
            Some(user) if accepted => CredentialCheck::Accepted(user),
            Some(_) => CredentialCheck::Rejected,
            None => CredentialCheck::UnknownUser,
        }
    }

    fn decoys_besides<'a>(
        &'a self,
        user: Option<&'a User>,
    ) -> impl Iterator<Item = &'a Credential> {
        let skip = user.map(|user| user.credential.scheme());
        self.decoys
            .iter()
            .filter(move |decoy| Some(decoy.scheme()) != skip)
    }

    /// The user's own service wins; otherwise groups are consulted in the user's declared order.
    pub fn service_for(
        &self,
        username: &str,
        service: &str,
    ) -> Result<&Service, PolicyLookupError> {
        let user = self.user(username)?;
        let wanted = service.to_ascii_lowercase();
        user.services
            .iter()
            .chain(
                user.groups
                    .iter()
                    .filter_map(|g| self.groups.get(g))
                    .flat_map(|g| g.services.iter()),
            )
            .find(|s| s.name == wanted)
            .ok_or_else(|| PolicyLookupError::ServiceNotDefined {
                user: username.to_string(),
                service: service.to_string(),
            })
    }

    pub fn privilege_for(&self, user: &User) -> u8 {
        user.privilege
            .or_else(|| {
                user.groups
                    .iter()
                    .filter_map(|g| self.groups.get(g))
                    .find_map(|g| g.privilege)
            })
            .unwrap_or(DEFAULT_PRIVILEGE)
    }

    pub fn default_authorization(&self) -> Verdict {
        self.default_authorization
    }

    pub fn require_authentication(&self) -> bool {
        self.require_authentication
    }

    pub fn require_accounting_sink(&self) -> bool {
        self.require_accounting_sink
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn client_count(&self) -> usize {
        self.client_secrets.len()
    }

    pub fn rule_count(&self) -> usize {
        let user_rules = self.users.values().flat_map(|u| u.services.iter());
        let group_rules = self.groups.values().flat_map(|g| g.services.iter());
        user_rules.chain(group_rules).map(|s| s.rules.len()).sum()
    }
}

fn check_privilege(privilege: Option<u8>) -> Result<()> {
    if let Some(level) = privilege {
        ensure!(level <= MAX_PRIVILEGE, "privilege {level} outside 0-{MAX_PRIVILEGE}");
    }
    Ok(())
}

fn compile_services(configs: &[ServiceConfig]) -> Result<Vec<Service>> {
    let mut seen = HashSet::new();
    let mut services = Vec::with_capacity(configs.len());
    for config in configs {
        let service =
            Service::compile(config).with_context(|| format!("service {:?}", config.name))?;
        if !seen.insert(service.name.clone()) {
            bail!("duplicate service {:?}", config.name);
        }
        services.push(service);
    }
    Ok(services)
}

fn compile_group(config: &GroupConfig) -> Result<Group> {
    ensure!(!config.name.is_empty(), "group name is empty");
    check_privilege(config.privilege)?;
    Ok(Group {
        name: config.name.clone(),
        privilege: config.privilege,
        services: compile_services(&config.services)?,
    })
}

fn compile_user(config: &UserConfig, groups: &HashMap<String, Group>) -> Result<User> {
    ensure!(!config.username.is_empty(), "username is empty");
    check_privilege(config.privilege)?;
    for group in &config.groups {
        ensure!(groups.contains_key(group), "unknown group {group:?}");
    }
    Ok(User {
        username: config.username.clone(),
        credential: Credential::compile(&config.credential)?,
        privilege: config.privilege,
        groups: config.groups.clone(),
        services: compile_services(&config.services)?,
    })
}

fn compile_client_secrets(document: &PolicyDocument) -> Result<HashMap<IpAddr, Vec<u8>>> {
    let mut secrets = HashMap::new();

    // Group membership is the fallback, so fill it first and let explicit entries override.
    for (name, group) in &document.client_groups {
        ensure!(!group.secret.is_empty(), "client group {name:?} has an empty secret");
        for member in &group.members {
            let member = member.to_canonical();
            if secrets.insert(member, group.secret.as_bytes().to_vec()).is_some() {
                bail!("client {member} belongs to more than one client group");
            }
        }
    }

    let mut explicit = HashSet::new();
    for client in &document.clients {
        let address = client.address.to_canonical();
        if !explicit.insert(address) {
            bail!("duplicate client {address}");
        }
        let group_secret = match &client.group {
            Some(name) => Some(
                document
                    .client_groups
                    .get(name)
                    .map(|g| g.secret.as_str())
                    .ok_or_else(|| anyhow!("client {address} references unknown group {name:?}"))?,
            ),
            None => None,
        };
        let secret = client
            .secret
            .as_deref()
            .or(group_secret)
            .ok_or_else(|| anyhow!("client {address} has no secret and no group"))?;
        ensure!(!secret.is_empty(), "client {address} has an empty secret");
        secrets.insert(address, secret.as_bytes().to_vec());
    }
    Ok(secrets)
}
