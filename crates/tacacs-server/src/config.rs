// SPDX-License-Identifier: AGPL-3.0-only
use crate::session::DEFAULT_MAX_ROUNDS;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// JSON structured logging for log aggregation (ELK, Loki).
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "tacd",
    version,
    about = "TACACS+ authentication, authorization and accounting daemon"
)]
pub struct Args {
    /// Validate a policy file and exit.
    #[arg(long)]
    pub check_policy: Option<PathBuf>,

    /// JSON schema to validate policy files against.
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Path to the active policy.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Listen address for TACACS+.
    #[arg(long, default_value = "0.0.0.0:49")]
    pub listen: SocketAddr,

    /// Listen address for HTTP health checks, Prometheus metrics and reload (e.g., 127.0.0.1:8080).
    #[arg(long)]
    pub listen_http: Option<SocketAddr>,

    /// Maximum concurrent TACACS+ connections; further connections are dropped.
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_sessions: u32,

    /// Maximum concurrent connections allowed per peer IP (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_connections_per_ip: u32,

    /// Close a connection when no packet arrives within this many seconds.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub idle_timeout_secs: u64,

    /// Maximum CONTINUE rounds in one authentication exchange.
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_auth_rounds: u8,

    /// Delay (ms) before sending an authentication FAIL (0 = no delay).
    #[arg(long, default_value_t = 0)]
    pub auth_fail_delay_ms: u64,

    /// Forward accounting records to this syslog collector over UDP (RFC 5424).
    #[arg(long)]
    pub syslog: Option<SocketAddr>,

    /// Syslog facility code for forwarded accounting records (default: authpriv).
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=23))]
    pub syslog_facility: u8,

    /// Seconds to wait for in-flight connections after SIGTERM.
    #[arg(long, default_value_t = 30)]
    pub shutdown_drain_timeout_secs: u64,

    /// Log output format: text or json.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Connection and session bounds applied by the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_sessions: u32,
    pub max_connections_per_ip: u32,
    pub idle_timeout: Duration,
    pub max_auth_rounds: u8,
    pub auth_fail_delay: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_sessions: 1024,
            max_connections_per_ip: 0,
            idle_timeout: Duration::from_secs(60),
            max_auth_rounds: DEFAULT_MAX_ROUNDS,
            auth_fail_delay: Duration::ZERO,
        }
    }
}

impl From<&Args> for Limits {
    fn from(args: &Args) -> Self {
        Limits {
            max_sessions: args.max_sessions,
            max_connections_per_ip: args.max_connections_per_ip,
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            max_auth_rounds: args.max_auth_rounds,
            auth_fail_delay: Duration::from_millis(args.auth_fail_delay_ms),
        }
    }
}
