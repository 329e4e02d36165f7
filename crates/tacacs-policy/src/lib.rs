//! Policy store for the TACACS+ daemon: loaded once from JSON, compiled, then shared
//! read-only by every session until a reload replaces it wholesale.

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::fs;
use std::path::Path;

mod credential;
mod document;
mod error;
mod rules;
mod store;

pub use credential::{Credential, CredentialVerifier, StoredCredentialVerifier, chap_digest};
pub use document::{
    AccountingConfig, ClientConfig, ClientGroupConfig, CredentialConfig, DefaultsConfig,
    GroupConfig, PolicyDocument, RuleConfig, ServiceConfig, UserConfig,
};
pub use error::{ConfigLoadError, PolicyLookupError};
pub use rules::{CommandRule, ReplyMode, RuleDecision, Verdict, evaluate, normalize_command};
pub use store::{
    CredentialCheck, DEFAULT_PRIVILEGE, Group, MAX_PRIVILEGE, PolicyStore, Service, User,
};

impl PolicyStore {
    pub fn from_path(
        policy: impl AsRef<Path>,
        schema: Option<impl AsRef<Path>>,
    ) -> Result<Self, ConfigLoadError> {
        let document = load_document(policy.as_ref(), schema.as_ref().map(|s| s.as_ref()))?;
        Self::from_document(document)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let document: PolicyDocument =
            serde_json::from_str(contents).context("parsing JSON policy")?;
        Self::from_document(document)
    }
}

/// Loads, schema-checks, and compiles a policy without installing it anywhere.
pub fn validate_policy_file(
    policy: impl AsRef<Path>,
    schema: impl AsRef<Path>,
) -> Result<PolicyDocument, ConfigLoadError> {
    let document = load_document(policy.as_ref(), Some(schema.as_ref()))?;
    PolicyStore::from_document(document.clone())?;
    Ok(document)
}

fn load_document(path: &Path, schema: Option<&Path>) -> Result<PolicyDocument> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading policy {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing JSON policy {}", path.display()))?;

    if let Some(schema_path) = schema {
        validate_against_schema(&value, schema_path)?;
    }

    serde_json::from_value(value)
        .with_context(|| format!("deserializing policy {}", path.display()))
}

fn validate_against_schema(value: &Value, schema_path: &Path) -> Result<()> {
    let schema_contents = fs::read_to_string(schema_path)
        .with_context(|| format!("reading schema {}", schema_path.display()))?;
    let schema_json: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parsing JSON schema {}", schema_path.display()))?;
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft202012)
        .compile(&schema_json)
        .map_err(|err| anyhow!("compiling schema {}: {err}", schema_path.display()))?;

    compiled.validate(value).map_err(|errors| {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        anyhow!("policy failed schema validation: {}", messages.join("; "))
    })
}
