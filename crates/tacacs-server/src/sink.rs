// SPDX-License-Identifier: AGPL-3.0-only
//! Accounting sinks. The engine only hands formatted records to a sink; delivery is the
//! sink's business.

use crate::accounting::AccountingRecord;
use crate::error::SinkUnavailableError;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::info;

/// Syslog severity for accounting records (informational).
const SYSLOG_SEVERITY_INFO: u8 = 6;

/// Destination for accounting records.
///
/// Implementations must not block the calling session for longer than one network
/// round trip; retries belong to the collector, not the daemon.
#[async_trait]
pub trait AccountingSink: Send + Sync {
    /// Deliver one record.
    async fn emit(&self, record: &AccountingRecord) -> Result<(), SinkUnavailableError>;

    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;
}

/// Writes each record as a structured `tracing` event under `tacd::accounting`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AccountingSink for TracingSink {
    async fn emit(&self, record: &AccountingRecord) -> Result<(), SinkUnavailableError> {
        info!(
            target: "tacd::accounting",
            kind = %record.kind,
            session = record.session_id,
            peer = %record.peer,
            user = %record.user,
            port = %record.port,
            rem_addr = %record.rem_addr,
            service = record.service.as_deref().unwrap_or(""),
            task_id = record.task_id.as_deref().unwrap_or(""),
            cmd = record.command.as_deref().unwrap_or(""),
            attributes = ?record.attributes,
            "accounting record"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// RFC 5424 messages over UDP to a remote collector.
#[derive(Debug)]
pub struct SyslogSink {
    socket: UdpSocket,
    target: SocketAddr,
    facility: u8,
    pid: u32,
}

impl SyslogSink {
    pub async fn connect(target: SocketAddr, facility: u8) -> std::io::Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(SyslogSink {
            socket,
            target,
            facility,
            pid: std::process::id(),
        })
    }

    pub fn priority(&self) -> u16 {
        u16::from(self.facility) * 8 + u16::from(SYSLOG_SEVERITY_INFO)
    }

    /// `<PRI>1 TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD MSG`
    pub fn format_message(&self, record: &AccountingRecord) -> String {
        format!(
            "<{}>1 {} - tacd {} acct - {}",
            self.priority(),
            record.timestamp_rfc3339(),
            self.pid,
            record.format_fields()
        )
    }
}

#[async_trait]
impl AccountingSink for SyslogSink {
    async fn emit(&self, record: &AccountingRecord) -> Result<(), SinkUnavailableError> {
        let message = self.format_message(record);
        self.socket
            .send_to(message.as_bytes(), self.target)
            .await
            .map_err(|e| SinkUnavailableError::new(self.name(), e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "syslog"
    }
}

/// Emits to every inner sink; reports the first failure after all have been tried.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AccountingSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AccountingSink>>) -> Self {
        FanoutSink { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AccountingSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AccountingSink for FanoutSink {
    async fn emit(&self, record: &AccountingRecord) -> Result<(), SinkUnavailableError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(record).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}
