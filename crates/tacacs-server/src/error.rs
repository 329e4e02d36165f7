// SPDX-License-Identifier: AGPL-3.0-only
use std::net::IpAddr;
use std::time::Duration;
use tacd_proto::FramingError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("expected seq_no {expected}, received {received}")]
    OutOfOrder { expected: u8, received: u8 },
    #[error("session id {received:#010x} does not match active session {expected:#010x}")]
    SessionMismatch { expected: u32, received: u32 },
    #[error("packet type {received} does not match session type {expected}")]
    TypeMismatch { expected: u8, received: u8 },
    #[error("sequence number space exhausted")]
    Exhausted,
    #[error("packet received after the session ended")]
    AfterTerminal,
    #[error("authentication START inside a running exchange")]
    UnexpectedStart,
    #[error("authentication CONTINUE without a pending prompt")]
    UnexpectedContinue,
}

/// Every variant ends the connection. Nothing is written back to the peer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("sequence violation: {0}")]
    Sequence(#[from] SequenceError),
    #[error("protocol abuse: {rounds} continue rounds exceed the limit of {limit}")]
    ProtocolAbuse { rounds: u8, limit: u8 },
    #[error("no packet within {0:?}")]
    IdleTimeout(Duration),
    #[error("no shared secret configured for client {0}")]
    UnknownClient(IpAddr),
}

impl SessionError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Framing(_) => "framing",
            SessionError::Sequence(_) => "sequence",
            SessionError::ProtocolAbuse { .. } => "protocol_abuse",
            SessionError::IdleTimeout(_) => "idle_timeout",
            SessionError::UnknownClient(_) => "unknown_client",
        }
    }
}

#[derive(Debug, Error)]
#[error("accounting sink {sink} unavailable: {reason}")]
pub struct SinkUnavailableError {
    pub sink: &'static str,
    pub reason: String,
}

impl SinkUnavailableError {
    pub fn new(sink: &'static str, reason: impl ToString) -> Self {
        SinkUnavailableError {
            sink,
            reason: reason.to_string(),
        }
    }
}
