// SPDX-License-Identifier: AGPL-3.0-only
//! Connection dispatcher: accept loop, connection caps, and the per-connection packet loop.

use crate::accounting::{AccountingRecord, account};
use crate::auth::{self, method_name};
use crate::authorize::authorize;
use crate::config::Limits;
use crate::error::{SequenceError, SessionError};
use crate::metrics::{AuthnTimer, AuthzTimer, metrics};
use crate::policy::PolicyHandle;
use crate::session::{Admission, Identity, Session, SessionMachine};
use crate::sink::AccountingSink;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tacd_policy::PolicyStore;
use tacd_proto::{
    ACCT_STATUS_SUCCESS, AUTHEN_STATUS_FAIL, AccountingRequest, AuthenPacket,
    AuthorizationRequest, Header, Packet, authen_status_is_terminal, read_packet,
    write_accounting_reply, write_authen_reply, write_author_response,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SessionCap,
    PerIpCap,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::SessionCap => "max_sessions",
            RejectReason::PerIpCap => "max_connections_per_ip",
        }
    }
}

/// Bounds concurrent connections globally and per peer address. Excess connections are
/// refused, never queued.
#[derive(Debug, Clone)]
pub struct ConnLimiter {
    global: Arc<Semaphore>,
    capacity: u32,
    per_ip_limit: u32,
    per_ip: Arc<Mutex<HashMap<IpAddr, u32>>>,
}

impl ConnLimiter {
    /// `max_per_ip == 0` disables the per-address cap.
    pub fn new(max_sessions: u32, max_per_ip: u32) -> Self {
        let capacity = max_sessions.max(1);
        ConnLimiter {
            global: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            per_ip_limit: max_per_ip,
            per_ip: Arc::default(),
        }
    }

    pub fn try_acquire(&self, ip: IpAddr) -> Result<ConnPermit, RejectReason> {
        let global = self
            .global
            .clone()
            .try_acquire_owned()
            .map_err(|_| RejectReason::SessionCap)?;
        if self.per_ip_limit > 0 {
            let mut counts = self.per_ip.lock().unwrap_or_else(|e| e.into_inner());
            let count = counts.entry(ip).or_insert(0);
            if *count >= self.per_ip_limit {
                return Err(RejectReason::PerIpCap);
            }
            *count += 1;
        }
        Ok(ConnPermit {
            _global: global,
            ip,
            per_ip: (self.per_ip_limit > 0).then(|| self.per_ip.clone()),
        })
    }

    pub fn active(&self) -> usize {
        self.capacity as usize - self.global.available_permits()
    }

    /// Waits for every open connection to finish. Returns false if `deadline` passed first.
    pub async fn drain(&self, deadline: Duration) -> bool {
        matches!(
            timeout(deadline, self.global.acquire_many(self.capacity)).await,
            Ok(Ok(_))
        )
    }
}

/// Held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnPermit {
    _global: OwnedSemaphorePermit,
    ip: IpAddr,
    per_ip: Option<Arc<Mutex<HashMap<IpAddr, u32>>>>,
}

impl Drop for ConnPermit {
    fn drop(&mut self) {
        let Some(per_ip) = &self.per_ip else {
            return;
        };
        let mut counts = per_ip.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.ip);
            }
        }
    }
}

/// Everything a connection handler needs. Cheap to clone per connection.
#[derive(Clone)]
pub struct ServerContext {
    pub policy: PolicyHandle,
    pub sink: Arc<dyn AccountingSink>,
    pub limits: Limits,
}

/// Accepts until `shutdown` resolves. Open connections keep running; use
/// `ConnLimiter::drain` to wait for them.
pub async fn serve<F>(
    listener: TcpListener,
    ctx: ServerContext,
    limiter: ConnLimiter,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(
        addr = %listener.local_addr()?,
        max_sessions = ctx.limits.max_sessions,
        max_connections_per_ip = ctx.limits.max_connections_per_ip,
        "listening for TACACS+"
    );
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(active = limiter.active(), "no longer accepting TACACS+ connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let permit = match limiter.try_acquire(peer.ip()) {
                    Ok(permit) => permit,
                    Err(reason) => {
                        metrics()
                            .connections_rejected
                            .with_label_values(&[reason.as_str()])
                            .inc();
                        warn!(peer = %peer, reason = reason.as_str(), "connection refused");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    metrics().connections_active.inc();
                    let result = handle_connection(socket, peer, &ctx).await;
                    metrics().connections_active.dec();
                    match result {
                        Ok(()) => {
                            metrics().connections_total.with_label_values(&["closed"]).inc();
                        }
                        Err(err) => {
                            metrics()
                                .connections_total
                                .with_label_values(&["terminated"])
                                .inc();
                            metrics()
                                .session_errors_total
                                .with_label_values(&[err.kind()])
                                .inc();
                            warn!(
                                peer = %peer,
                                kind = err.kind(),
                                error = %err,
                                "connection terminated"
                            );
                        }
                    }
                });
            }
        }
    }
}

/// Runs one connection to completion. Any error ends the connection without a reply.
#[tracing::instrument(skip_all, fields(peer = %peer))]
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let secret = ctx
        .policy
        .snapshot()
        .await
        .secret_for(peer.ip())
        .map(<[u8]>::to_vec)
        .map_err(|_| SessionError::UnknownClient(peer.ip()))?;
    Connection {
        stream,
        peer,
        ctx,
        secret,
        machine: SessionMachine::new(ctx.limits.max_auth_rounds),
        session: None,
        identity: None,
        single_connect: None,
    }
    .run()
    .await
}

struct Connection<'a, S> {
    stream: S,
    peer: SocketAddr,
    ctx: &'a ServerContext,
    secret: Vec<u8>,
    machine: SessionMachine,
    session: Option<Session>,
    /// Survives across exchanges on a single-connect connection.
    identity: Option<Identity>,
    /// Latched from the first packet; later flags cannot change the mode.
    single_connect: Option<bool>,
}

impl<S> Connection<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) -> Result<(), SessionError> {
        loop {
            let Some(packet) = self.next_packet().await? else {
                debug!(peer = %self.peer, "client closed connection");
                return Ok(());
            };
            let header = *packet.header();
            let admission = self.machine.accept(&header)?;
            let single_connect = *self
                .single_connect
                .get_or_insert(header.is_single_connect());
            if admission == Admission::Start {
                let snapshot = self.ctx.policy.snapshot().await;
                self.session = Some(Session::new(header.session_id, snapshot));
            }

            let terminal = match packet {
                Packet::Authentication(packet) => self.on_authen(admission, &header, packet).await?,
                Packet::Authorization(request) => self.on_author(&header, &request).await?,
                Packet::Accounting(request) => self.on_acct(&header, &request).await?,
            };

            if terminal {
                self.session = None;
                if !single_connect {
                    return Ok(());
                }
                self.machine.rearm();
            }
        }
    }

    async fn next_packet(&mut self) -> Result<Option<Packet>, SessionError> {
        let idle = self.ctx.limits.idle_timeout;
        let packet = timeout(idle, read_packet(&mut self.stream, &self.secret))
            .await
            .map_err(|_| SessionError::IdleTimeout(idle))??;
        Ok(packet)
    }

    fn policy(&self) -> Result<Arc<PolicyStore>, SequenceError> {
        self.session
            .as_ref()
            .map(|s| s.policy.clone())
            .ok_or(SequenceError::AfterTerminal)
    }

    async fn on_authen(
        &mut self,
        admission: Admission,
        header: &Header,
        packet: AuthenPacket,
    ) -> Result<bool, SessionError> {
        let policy = self.policy()?;
        let (user, timer, outcome) = match (admission, packet) {
            (Admission::Start, AuthenPacket::Start(start)) => {
                let timer = AuthnTimer::new(method_name(start.authen_type));
                let outcome = auth::start(&policy, &start);
                (start.user, timer, outcome)
            }
            (Admission::Continue, AuthenPacket::Continue(cont)) => {
                let pending = self
                    .session
                    .as_mut()
                    .and_then(|s| s.pending.take())
                    .ok_or(SequenceError::UnexpectedContinue)?;
                let timer = AuthnTimer::new(pending.method());
                let user = pending.user().unwrap_or_default().to_string();
                (user, timer, auth::resume(&policy, pending, &cont))
            }
            (Admission::Start, AuthenPacket::Continue(_)) => {
                return Err(SequenceError::UnexpectedContinue.into());
            }
            (Admission::Continue, AuthenPacket::Start(_)) => {
                return Err(SequenceError::UnexpectedStart.into());
            }
        };
        timer.finish(outcome.result_label());

        let status = outcome.reply.status;
        let terminal = authen_status_is_terminal(status);
        if status == AUTHEN_STATUS_FAIL && !self.ctx.limits.auth_fail_delay.is_zero() {
            sleep(self.ctx.limits.auth_fail_delay).await;
        }
        self.machine.reply(terminal)?;
        write_authen_reply(&mut self.stream, header, &outcome.reply, &self.secret).await?;

        if terminal {
            info!(
                peer = %self.peer,
                session = header.session_id,
                user = %user,
                method = outcome.method,
                result = outcome.result_label(),
                "authentication finished"
            );
        } else if let Some(session) = self.session.as_mut() {
            session.pending = outcome.pending;
        }
        if let Some(identity) = outcome.identity {
            self.identity = Some(identity);
        }
        Ok(terminal)
    }

    async fn on_author(
        &mut self,
        header: &Header,
        request: &AuthorizationRequest,
    ) -> Result<bool, SessionError> {
        let policy = self.policy()?;
        let timer = AuthzTimer::new();
        let decision = authorize(&policy, self.identity.as_ref(), request);
        timer.finish(decision.result_label());
        info!(
            peer = %self.peer,
            session = header.session_id,
            user = %request.user,
            service = request.service().as_deref().unwrap_or(""),
            cmd = request.command_string().as_deref().unwrap_or(""),
            result = decision.result_label(),
            rule = ?decision.matched_rule,
            reason = decision.reason,
            "authorization decision"
        );
        self.machine.reply(true)?;
        write_author_response(&mut self.stream, header, &decision.response, &self.secret).await?;
        Ok(true)
    }

    async fn on_acct(
        &mut self,
        header: &Header,
        request: &AccountingRequest,
    ) -> Result<bool, SessionError> {
        let policy = self.policy()?;
        let record = AccountingRecord::from_request(self.peer.ip(), request);
        let reply = account(self.ctx.sink.as_ref(), &policy, &record).await;
        let status = if reply.status == ACCT_STATUS_SUCCESS {
            "success"
        } else {
            "error"
        };
        metrics()
            .acct_records_total
            .with_label_values(&[record.kind.as_str(), status])
            .inc();
        debug!(
            peer = %self.peer,
            session = header.session_id,
            user = %request.user,
            kind = %record.kind,
            status,
            "accounting request"
        );
        self.machine.reply(true)?;
        write_accounting_reply(&mut self.stream, header, &reply, &self.secret).await?;
        Ok(true)
    }
}
