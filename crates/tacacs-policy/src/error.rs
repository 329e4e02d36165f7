// SPDX-License-Identifier: AGPL-3.0-only
use std::net::IpAddr;
use thiserror::Error;

/// The policy input could not be read, validated, or compiled. The caller keeps
/// whatever store it already had.
#[derive(Debug, Error)]
#[error("policy load failed: {0:#}")]
pub struct ConfigLoadError(anyhow::Error);

impl ConfigLoadError {
    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }
}

impl From<anyhow::Error> for ConfigLoadError {
    fn from(err: anyhow::Error) -> Self {
        ConfigLoadError(err)
    }
}

/// Lookups that miss. These are answered with FAIL and never end a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyLookupError {
    #[error("user {0:?} not found")]
    UnknownUser(String),
    #[error("service not defined")]
    ServiceNotDefined { user: String, service: String },
    #[error("no shared secret for client {0}")]
    UnknownClient(IpAddr),
}
