// SPDX-License-Identifier: AGPL-3.0-only
//! Framing failures. Every variant is fatal for the connection that produced it.

use crate::MAX_BODY_LEN;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("TACACS+ header truncated after {0} of 12 bytes")]
    TruncatedHeader(usize),

    #[error("declared body length {declared} does not match {received} received bytes")]
    LengthMismatch { declared: u32, received: usize },

    #[error("declared body length {0} exceeds the {MAX_BODY_LEN} byte limit")]
    BodyTooLarge(u32),

    #[error("unsupported TACACS+ major version {0:#x}")]
    UnsupportedVersion(u8),

    #[error("unsupported TACACS+ flags set {0:#04x}")]
    UnsupportedFlags(u8),

    #[error("unencrypted TACACS+ packet refused")]
    Unencrypted,

    #[error("unknown TACACS+ packet type {0}")]
    UnknownType(u8),

    #[error("malformed {kind} body: {reason:#}")]
    Body {
        kind: &'static str,
        reason: anyhow::Error,
    },

    #[error("shared secret is empty")]
    EmptySecret,

    #[error("body obfuscation is disabled (legacy-md5 feature off)")]
    ObfuscationDisabled,

    #[error("MD5 pad generation failed: {0}")]
    Digest(#[from] openssl::error::ErrorStack),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    pub(crate) fn body(kind: &'static str, reason: anyhow::Error) -> Self {
        FramingError::Body { kind, reason }
    }
}
