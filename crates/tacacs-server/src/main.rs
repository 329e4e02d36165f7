use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tacd::config::{Args, Limits, LogFormat};
use tacd::http::{AdminState, ServerState, serve_http};
use tacd::policy::{PolicyHandle, validate_policy, watch_sighup};
use tacd::server::{ConnLimiter, ServerContext, serve};
use tacd::sink::{AccountingSink, FanoutSink, SyslogSink, TracingSink};
use tacd_policy::PolicyStore;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    if let Some(policy_path) = args.check_policy.as_ref() {
        let store = validate_policy(policy_path, args.schema.as_deref())?;
        println!(
            "policy validated: {} users, {} clients, {} rules",
            store.user_count(),
            store.client_count(),
            store.rule_count()
        );
        return Ok(());
    }

    let policy_path = args
        .policy
        .as_ref()
        .context("a --policy path is required to start the server")?;
    let store = PolicyStore::from_path(policy_path, args.schema.as_ref())?;
    info!(
        users = store.user_count(),
        clients = store.client_count(),
        rules = store.rule_count(),
        "policy loaded"
    );
    let policy = PolicyHandle::new(store).with_source(policy_path, args.schema.clone());

    let sink = build_sink(&args).await?;
    let limits = Limits::from(&args);
    let limiter = ConnLimiter::new(limits.max_sessions, limits.max_connections_per_ip);
    let state = ServerState::new();

    if let Some(addr) = args.listen_http {
        let admin = AdminState {
            server: state.clone(),
            policy: policy.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = serve_http(addr, admin).await {
                error!(error = %err, "admin HTTP listener stopped");
            }
        });
    }

    tokio::spawn(watch_sighup(policy.clone()));

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding TACACS+ listener {}", args.listen))?;
    let ctx = ServerContext {
        policy,
        sink,
        limits,
    };
    state.set_ready(true);
    serve(listener, ctx, limiter.clone(), shutdown_signal()).await?;

    state.set_ready(false);
    let drain = Duration::from_secs(args.shutdown_drain_timeout_secs);
    if limiter.drain(drain).await {
        info!("all connections drained");
    } else {
        warn!(
            remaining = limiter.active(),
            "drain timeout reached; exiting with open connections"
        );
    }
    state.set_alive(false);
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_env_filter(filter);
    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

async fn build_sink(args: &Args) -> Result<Arc<dyn AccountingSink>> {
    let mut fanout = FanoutSink::default();
    fanout.push(Arc::new(TracingSink));
    if let Some(collector) = args.syslog {
        let syslog = SyslogSink::connect(collector, args.syslog_facility)
            .await
            .with_context(|| format!("opening syslog socket for {collector}"))?;
        info!(
            collector = %collector,
            facility = args.syslog_facility,
            "forwarding accounting records to syslog"
        );
        fanout.push(Arc::new(syslog));
    }
    Ok(Arc::new(fanout))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
        }
    }
    info!("shutdown signal received");
}
