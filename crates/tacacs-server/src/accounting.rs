// SPDX-License-Identifier: AGPL-3.0-only
//! Accounting engine: one record per request, handed to the configured sink.

use crate::sink::AccountingSink;
use std::fmt::Write as _;
use std::net::IpAddr;
use tacd_policy::PolicyStore;
use tacd_proto::{
    ACCT_STATUS_ERROR, ACCT_STATUS_SUCCESS, AccountingReply, AccountingRequest, AcctKind,
    Attribute,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

/// Attributes lifted into dedicated record fields.
const LIFTED: &[&str] = &["service", "cmd", "cmd-arg", "task_id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingRecord {
    pub timestamp: OffsetDateTime,
    pub kind: AcctKind,
    pub session_id: u32,
    pub peer: IpAddr,
    pub user: String,
    pub port: String,
    pub rem_addr: String,
    pub service: Option<String>,
    pub command: Option<String>,
    pub task_id: Option<String>,
    pub attributes: Vec<String>,
}

impl AccountingRecord {
    pub fn from_request(peer: IpAddr, request: &AccountingRequest) -> Self {
        let attributes = request
            .args
            .iter()
            .filter(|raw| {
                Attribute::parse(raw)
                    .map(|a| !LIFTED.iter().any(|l| a.name.eq_ignore_ascii_case(l)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        AccountingRecord {
            timestamp: OffsetDateTime::now_utc(),
            kind: request.kind,
            session_id: request.header.session_id,
            peer,
            user: request.user.clone(),
            port: request.port.clone(),
            rem_addr: request.rem_addr.clone(),
            service: request.service(),
            command: request.command_string(),
            task_id: request.task_id(),
            attributes,
        }
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string())
    }

    /// `key=value` fields without the timestamp.
    pub fn format_fields(&self) -> String {
        let mut out = format!(
            "kind={} session={:#010x} peer={} user={:?} port={:?} rem_addr={:?}",
            self.kind, self.session_id, self.peer, self.user, self.port, self.rem_addr
        );
        if let Some(service) = &self.service {
            let _ = write!(out, " service={service:?}");
        }
        if let Some(task_id) = &self.task_id {
            let _ = write!(out, " task_id={task_id:?}");
        }
        if let Some(command) = &self.command {
            let _ = write!(out, " cmd={command:?}");
        }
        for attr in &self.attributes {
            let _ = write!(out, " attr={attr:?}");
        }
        out
    }

    pub fn format_line(&self) -> String {
        format!("{} {}", self.timestamp_rfc3339(), self.format_fields())
    }
}

/// Emits the record and builds the reply. Sink failures only surface to the client when
/// the policy marks the sink as mandatory.
pub async fn account(
    sink: &dyn AccountingSink,
    policy: &PolicyStore,
    record: &AccountingRecord,
) -> AccountingReply {
    match sink.emit(record).await {
        Ok(()) => AccountingReply {
            status: ACCT_STATUS_SUCCESS,
            server_msg: String::new(),
            data: String::new(),
        },
        Err(err) => {
            warn!(
                error = %err,
                session = record.session_id,
                user = %record.user,
                "accounting record not delivered"
            );
            if policy.require_accounting_sink() {
                AccountingReply {
                    status: ACCT_STATUS_ERROR,
                    server_msg: "accounting unavailable".into(),
                    data: String::new(),
                }
            } else {
                AccountingReply {
                    status: ACCT_STATUS_SUCCESS,
                    server_msg: String::new(),
                    data: String::new(),
                }
            }
        }
    }
}
