// SPDX-License-Identifier: Apache-2.0
//! Prometheus metrics for the daemon.

use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_active: Gauge,
    pub connections_total: CounterVec,
    pub connections_rejected: CounterVec,
    pub session_errors_total: CounterVec,

    // Authentication metrics
    pub authn_requests_total: CounterVec,
    pub authn_duration_seconds: HistogramVec,

    // Authorization metrics
    pub authz_requests_total: CounterVec,
    pub authz_duration_seconds: Histogram,

    // Accounting metrics
    pub acct_records_total: CounterVec,

    // Policy metrics
    pub policy_reload_total: CounterVec,
    pub policy_rules_count: Gauge,
    pub policy_generation: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let connections_active = Gauge::with_opts(Opts::new(
            "tacd_connections_active",
            "Number of open TACACS+ connections",
        ))
        .expect("metric can be created");

        let connections_total = CounterVec::new(
            Opts::new("tacd_connections_total", "Connections by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");

        let connections_rejected = CounterVec::new(
            Opts::new(
                "tacd_connections_rejected_total",
                "Connections refused at accept by reason",
            ),
            &["reason"],
        )
        .expect("metric can be created");

        let session_errors_total = CounterVec::new(
            Opts::new(
                "tacd_session_errors_total",
                "Connections terminated by a fatal session error",
            ),
            &["kind"],
        )
        .expect("metric can be created");

        let authn_requests_total = CounterVec::new(
            Opts::new(
                "tacd_authn_requests_total",
                "Authentication replies by method and result",
            ),
            &["method", "result"],
        )
        .expect("metric can be created");

        let authn_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tacd_authn_duration_seconds",
                "Authentication step duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method"],
        )
        .expect("metric can be created");

        let authz_requests_total = CounterVec::new(
            Opts::new("tacd_authz_requests_total", "Authorization replies by result"),
            &["result"],
        )
        .expect("metric can be created");

        let authz_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tacd_authz_duration_seconds",
                "Authorization decision duration in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]),
        )
        .expect("metric can be created");

        let acct_records_total = CounterVec::new(
            Opts::new(
                "tacd_acct_records_total",
                "Accounting records by type and reply status",
            ),
            &["type", "status"],
        )
        .expect("metric can be created");

        let policy_reload_total = CounterVec::new(
            Opts::new("tacd_policy_reload_total", "Policy reload attempts by result"),
            &["result"],
        )
        .expect("metric can be created");

        let policy_rules_count = Gauge::with_opts(Opts::new(
            "tacd_policy_rules_count",
            "Command rules in the active policy",
        ))
        .expect("metric can be created");

        let policy_generation = Gauge::with_opts(Opts::new(
            "tacd_policy_generation",
            "Generation of the active policy, starting at 1",
        ))
        .expect("metric can be created");

        registry
            .register(Box::new(connections_active.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(connections_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(connections_rejected.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(session_errors_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(authn_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(authn_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(authz_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(authz_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(acct_records_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(policy_reload_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(policy_rules_count.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(policy_generation.clone()))
            .expect("metric can be registered");

        Self {
            registry,
            connections_active,
            connections_total,
            connections_rejected,
            session_errors_total,
            authn_requests_total,
            authn_duration_seconds,
            authz_requests_total,
            authz_duration_seconds,
            acct_records_total,
            policy_reload_total,
            policy_rules_count,
            policy_generation,
        }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

/// Records one authentication step under its method label.
pub struct AuthnTimer {
    method: &'static str,
    start: Instant,
}

impl AuthnTimer {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }

    pub fn finish(self, result: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        metrics()
            .authn_duration_seconds
            .with_label_values(&[self.method])
            .observe(duration);
        metrics()
            .authn_requests_total
            .with_label_values(&[self.method, result])
            .inc();
    }
}

pub struct AuthzTimer {
    start: Instant,
}

impl AuthzTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn finish(self, result: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        metrics().authz_duration_seconds.observe(duration);
        metrics()
            .authz_requests_total
            .with_label_values(&[result])
            .inc();
    }
}

impl Default for AuthzTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let m = metrics();
        m.connections_active.inc();
        m.connections_total.with_label_values(&["accepted"]).inc();
        m.session_errors_total
            .with_label_values(&["protocol_abuse"])
            .inc();

        let output = m.encode();
        assert!(output.contains("tacd_connections_active"));
        assert!(output.contains("tacd_connections_total"));
        assert!(output.contains("tacd_session_errors_total"));
    }

    #[test]
    fn test_authn_timer() {
        let timer = AuthnTimer::new("pap");
        timer.finish("pass");

        let output = metrics().encode();
        assert!(output.contains("tacd_authn_duration_seconds"));
        assert!(output.contains("method=\"pap\""));
    }

    #[test]
    fn test_authz_timer() {
        AuthzTimer::new().finish("pass_add");

        let output = metrics().encode();
        assert!(output.contains("tacd_authz_duration_seconds"));
    }
}
