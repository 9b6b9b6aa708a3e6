//! Prometheus metrics for redirects and reloads
//!
//! Every collector is registered on a private registry so several engines
//! can live in one process (tests, mostly) without name clashes.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Metrics collector for the redirector
#[derive(Clone)]
pub struct RedirectorMetrics {
    registry: Registry,

    /// Total redirects served
    redirects_total: IntCounter,

    /// Redirects by mirror host
    redirects_by_server: IntCounterVec,

    /// Redirects whose path came from the remap table
    remap_hits_total: IntCounter,

    /// Requests that failed because no mirror was available
    no_mirror_total: IntCounter,

    /// Reload attempts by result
    reloads_total: IntCounterVec,

    /// Reload requests rejected by the token check
    reload_auth_failures_total: IntCounter,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub redirects: u64,
    pub remap_hits: u64,
    pub no_mirror: u64,
    pub reloads_succeeded: u64,
    pub reloads_failed: u64,
    pub reload_auth_failures: u64,
}

impl RedirectorMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on the given registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let redirects_total = IntCounter::new(
            "redirector_redirects_total",
            "Total number of redirects served",
        )?;
        registry.register(Box::new(redirects_total.clone()))?;

        let redirects_by_server = IntCounterVec::new(
            Opts::new(
                "redirector_redirects_by_server_total",
                "Number of redirects served per mirror",
            ),
            &["server"],
        )?;
        registry.register(Box::new(redirects_by_server.clone()))?;

        let remap_hits_total = IntCounter::new(
            "redirector_remap_hits_total",
            "Number of redirects resolved through the remap table",
        )?;
        registry.register(Box::new(remap_hits_total.clone()))?;

        let no_mirror_total = IntCounter::new(
            "redirector_no_mirror_total",
            "Number of requests that found no available mirror",
        )?;
        registry.register(Box::new(no_mirror_total.clone()))?;

        let reloads_total = IntCounterVec::new(
            Opts::new("redirector_reloads_total", "Number of topology reloads"),
            &["result"], // result: success, failure
        )?;
        registry.register(Box::new(reloads_total.clone()))?;

        let reload_auth_failures_total = IntCounter::new(
            "redirector_reload_auth_failures_total",
            "Number of reload requests rejected by authentication",
        )?;
        registry.register(Box::new(reload_auth_failures_total.clone()))?;

        Ok(Self {
            registry,
            redirects_total,
            redirects_by_server,
            remap_hits_total,
            no_mirror_total,
            reloads_total,
            reload_auth_failures_total,
        })
    }

    /// Record a served redirect
    pub fn record_redirect(&self, server: &str, remapped: bool) {
        self.redirects_total.inc();
        self.redirects_by_server.with_label_values(&[server]).inc();
        if remapped {
            self.remap_hits_total.inc();
        }
    }

    pub fn record_no_mirror(&self) {
        self.no_mirror_total.inc();
    }

    pub fn record_reload(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.reloads_total.with_label_values(&[result]).inc();
    }

    pub fn record_auth_failure(&self) {
        self.reload_auth_failures_total.inc();
    }

    /// Redirects served by one mirror host
    pub fn server_redirects(&self, server: &str) -> u64 {
        self.redirects_by_server.with_label_values(&[server]).get()
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            redirects: self.redirects_total.get(),
            remap_hits: self.remap_hits_total.get(),
            no_mirror: self.no_mirror_total.get(),
            reloads_succeeded: self.reloads_total.with_label_values(&["success"]).get(),
            reloads_failed: self.reloads_total.with_label_values(&["failure"]).get(),
            reload_auth_failures: self.reload_auth_failures_total.get(),
        }
    }

    /// Encode all collectors in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
