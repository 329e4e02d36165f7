// SPDX-License-Identifier: AGPL-3.0-only
//! Per-connection session sequencing. One exchange at a time; with single-connect the
//! next exchange may start once the previous one has ended.

use crate::auth::PendingAuthen;
use crate::error::{SequenceError, SessionError};
use std::sync::Arc;
use tacd_policy::PolicyStore;
use tacd_proto::Header;

pub const DEFAULT_MAX_ROUNDS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitStart,
    InProgress,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// seq 1: a new exchange begins.
    Start,
    /// A CONTINUE inside the running exchange.
    Continue,
}

#[derive(Debug, Clone, Copy)]
struct Track {
    session_id: u32,
    packet_type: u8,
    last_seq: u8,
    rounds: u8,
}

#[derive(Debug)]
pub struct SessionMachine {
    phase: SessionPhase,
    max_rounds: u8,
    track: Option<Track>,
}

impl SessionMachine {
    pub fn new(max_rounds: u8) -> Self {
        SessionMachine {
            phase: SessionPhase::AwaitStart,
            max_rounds,
            track: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<u32> {
        self.track.map(|t| t.session_id)
    }

    /// Validates an inbound client header against the running exchange.
    pub fn accept(&mut self, header: &Header) -> Result<Admission, SessionError> {
        if header.seq_no == u8::MAX {
            return Err(SequenceError::Exhausted.into());
        }
        match self.phase {
            SessionPhase::AwaitStart => {
                if header.seq_no != 1 {
                    return Err(SequenceError::OutOfOrder {
                        expected: 1,
                        received: header.seq_no,
                    }
                    .into());
                }
                self.track = Some(Track {
                    session_id: header.session_id,
                    packet_type: header.packet_type,
                    last_seq: 1,
                    rounds: 0,
                });
                self.phase = SessionPhase::InProgress;
                Ok(Admission::Start)
            }
            SessionPhase::InProgress => {
                let track = self.track.as_mut().ok_or(SequenceError::AfterTerminal)?;
                if header.session_id != track.session_id {
                    return Err(SequenceError::SessionMismatch {
                        expected: track.session_id,
                        received: header.session_id,
                    }
                    .into());
                }
                if header.packet_type != track.packet_type {
                    return Err(SequenceError::TypeMismatch {
                        expected: track.packet_type,
                        received: header.packet_type,
                    }
                    .into());
                }
                let expected = track.last_seq.wrapping_add(1);
                if header.seq_no != expected || track.last_seq % 2 != 0 {
                    return Err(SequenceError::OutOfOrder {
                        expected,
                        received: header.seq_no,
                    }
                    .into());
                }
                track.rounds = track.rounds.saturating_add(1);
                if track.rounds > self.max_rounds {
                    return Err(SessionError::ProtocolAbuse {
                        rounds: track.rounds,
                        limit: self.max_rounds,
                    });
                }
                track.last_seq = header.seq_no;
                Ok(Admission::Continue)
            }
            SessionPhase::Terminal => Err(SequenceError::AfterTerminal.into()),
        }
    }

    /// Records the server reply to the last accepted packet and returns its seq_no.
    pub fn reply(&mut self, terminal: bool) -> Result<u8, SequenceError> {
        let track = self.track.as_mut().ok_or(SequenceError::AfterTerminal)?;
        if track.last_seq % 2 == 0 {
            return Err(SequenceError::OutOfOrder {
                expected: track.last_seq.wrapping_add(1),
                received: track.last_seq,
            });
        }
        track.last_seq = track.last_seq.checked_add(1).ok_or(SequenceError::Exhausted)?;
        if terminal {
            self.phase = SessionPhase::Terminal;
        }
        Ok(track.last_seq)
    }

    /// Single-connect: after a terminal reply the connection may carry a new exchange.
    pub fn rearm(&mut self) {
        self.phase = SessionPhase::AwaitStart;
        self.track = None;
    }
}

/// Identity established by the last PASS on this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub privilege: u8,
}

/// One exchange. The policy snapshot is fixed when the START arrives.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub policy: Arc<PolicyStore>,
    pub pending: Option<PendingAuthen>,
}

impl Session {
    pub fn new(id: u32, policy: Arc<PolicyStore>) -> Self {
        Session {
            id,
            policy,
            pending: None,
        }
    }
}
