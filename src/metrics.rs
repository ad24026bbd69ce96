//! Prometheus metrics collection for kawana.
//!
//! Counters and gauges live in a process-wide registry and are served over
//! the HTTP endpoint in `http.rs`. The commands-per-second gauge is sampled
//! once per second from an atomic counter that every dispatched command
//! increments, matching what operators watch on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::store::IpStore;

/// Commands dispatched since the last one-second sample.
static CMDS_THIS_SEC: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Commands processed by type.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kawana_commands_total", "Commands processed by type"),
        &["command"]
    ).expect("COMMANDS_TOTAL metric creation failed");

    /// Connections dropped for protocol errors, by kind.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref PROTOCOL_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("kawana_protocol_errors_total", "Protocol errors by kind"),
        &["error"]
    ).expect("PROTOCOL_ERRORS metric creation failed");

    /// Commands per second, sampled at 1 Hz.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref CMDS_PER_SEC: IntGauge = IntGauge::new(
        "kawana_cmds_per_sec",
        "Commands dispatched in the last sampled second"
    ).expect("CMDS_PER_SEC metric creation failed");

    /// IPs currently tracked across the primary map and overlay.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref TRACKED_IPS: IntGauge = IntGauge::new(
        "kawana_tracked_ips",
        "Tracked IP addresses"
    ).expect("TRACKED_IPS metric creation failed");

    /// Snapshot attempts by outcome.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref SNAPSHOTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kawana_snapshots_total", "Snapshot attempts by outcome"),
        &["outcome"]
    ).expect("SNAPSHOTS_TOTAL metric creation failed");

    /// Wall time of a full persist cycle.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref SNAPSHOT_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("kawana_snapshot_duration_seconds", "Persist cycle duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
    ).expect("SNAPSHOT_DURATION metric creation failed");

    /// Remote backup attempts by outcome.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref BACKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kawana_backups_total", "Backup attempts by outcome"),
        &["outcome"]
    ).expect("BACKUPS_TOTAL metric creation failed");
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    if let Err(e) = REGISTRY.register(Box::new(COMMANDS_TOTAL.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_commands_total");
    }
    if let Err(e) = REGISTRY.register(Box::new(PROTOCOL_ERRORS.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_protocol_errors_total");
    }
    if let Err(e) = REGISTRY.register(Box::new(CMDS_PER_SEC.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_cmds_per_sec");
    }
    if let Err(e) = REGISTRY.register(Box::new(TRACKED_IPS.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_tracked_ips");
    }
    if let Err(e) = REGISTRY.register(Box::new(SNAPSHOTS_TOTAL.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_snapshots_total");
    }
    if let Err(e) = REGISTRY.register(Box::new(SNAPSHOT_DURATION.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_snapshot_duration_seconds");
    }
    if let Err(e) = REGISTRY.register(Box::new(BACKUPS_TOTAL.clone())) {
        tracing::warn!(error = %e, "Failed to register metric kawana_backups_total");
    }
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

/// Count a dispatched command toward the per-second sample. Called for
/// every opcode read off the wire, known or not.
#[inline]
pub fn record_dispatch() {
    CMDS_THIS_SEC.fetch_add(1, Ordering::Relaxed);
}

/// Record a successfully decoded command.
#[inline]
pub fn record_command(command: &str) {
    COMMANDS_TOTAL.with_label_values(&[command]).inc();
}

/// Record a connection dropped for a protocol error.
#[inline]
pub fn record_protocol_error(error: &str) {
    PROTOCOL_ERRORS.with_label_values(&[error]).inc();
}

/// Record a persist cycle.
#[inline]
pub fn record_snapshot(outcome: &str, duration_secs: f64) {
    SNAPSHOTS_TOTAL.with_label_values(&[outcome]).inc();
    SNAPSHOT_DURATION.observe(duration_secs);
}

/// Record a backup attempt.
#[inline]
pub fn record_backup(outcome: &str) {
    BACKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Spawn the 1 Hz sampler that publishes `kawana_cmds_per_sec` and the
/// tracked-IP gauge.
pub fn spawn_sampler(store: Arc<IpStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let sampled = CMDS_THIS_SEC.swap(0, Ordering::Relaxed);
            CMDS_PER_SEC.set(sampled as i64);
            TRACKED_IPS.set(store.tracked_ips() as i64);
        }
    });
}
