// Prometheus metrics for jailkeeper runs
//
// A run is a batch job, so metrics are not served over HTTP. They are
// written to a file for the node-exporter textfile collector:
// - Executed jail actions by kind and result (counter)
// - Privileged helper durations (histogram)
// - Runs by final status (counter)
// - Last run duration, failed tenants and timestamp (gauges)

use anyhow::Context;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::jail::planner::ActionKind;
use crate::jail::runner::Helper;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Jail metrics
    pub static ref JAIL_ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("jail_actions_total", "Jail actions executed"),
        &["action", "result"]
    ).expect("Failed to create jail actions metric");

    pub static ref JAIL_HELPER_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("jail_helper_duration_seconds", "Privileged helper run time in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["helper"]
    ).expect("Failed to create helper duration metric");

    pub static ref JAIL_HELPER_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("jail_helper_failures_total", "Privileged helper runs that failed or timed out"),
        &["helper"]
    ).expect("Failed to create helper failures metric");

    // Run metrics
    pub static ref RECONCILE_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reconcile_runs_total", "Reconciliation runs by final status"),
        &["status"]
    ).expect("Failed to create reconcile runs metric");

    pub static ref RECONCILE_RUN_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("reconcile_run_duration_seconds", "Reconciliation run duration in seconds")
            .buckets(vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
    ).expect("Failed to create run duration metric");

    pub static ref RECONCILE_FAILED_TENANTS: IntGauge = IntGauge::new(
        "reconcile_failed_tenants",
        "Tenants that failed in the last run"
    ).expect("Failed to create failed tenants metric");

    pub static ref RECONCILE_LAST_RUN_TIMESTAMP_SECONDS: Gauge = Gauge::new(
        "reconcile_last_run_timestamp_seconds",
        "Unix time the last run finished"
    ).expect("Failed to create last run timestamp metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(JAIL_ACTIONS_TOTAL.clone()),
        Box::new(JAIL_HELPER_DURATION_SECONDS.clone()),
        Box::new(JAIL_HELPER_FAILURES_TOTAL.clone()),
        Box::new(RECONCILE_RUNS_TOTAL.clone()),
        Box::new(RECONCILE_RUN_DURATION_SECONDS.clone()),
        Box::new(RECONCILE_FAILED_TENANTS.clone()),
        Box::new(RECONCILE_LAST_RUN_TIMESTAMP_SECONDS.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn record_action(action: ActionKind, success: bool) {
    let result = if success { "success" } else { "failed" };
    JAIL_ACTIONS_TOTAL
        .with_label_values(&[action.as_str(), result])
        .inc();
}

pub fn observe_helper(helper: Helper, duration: Duration, success: bool) {
    JAIL_HELPER_DURATION_SECONDS
        .with_label_values(&[helper.as_str()])
        .observe(duration.as_secs_f64());
    if !success {
        JAIL_HELPER_FAILURES_TOTAL
            .with_label_values(&[helper.as_str()])
            .inc();
    }
}

pub fn record_run(status: &str, duration: Duration, failed_tenants: usize) {
    RECONCILE_RUNS_TOTAL.with_label_values(&[status]).inc();
    RECONCILE_RUN_DURATION_SECONDS.observe(duration.as_secs_f64());
    RECONCILE_FAILED_TENANTS.set(i64::try_from(failed_tenants).unwrap_or(i64::MAX));
    RECONCILE_LAST_RUN_TIMESTAMP_SECONDS.set(chrono::Utc::now().timestamp() as f64);
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

/// Atomically replace `path` with the current metrics, so the collector
/// never reads a half-written file
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let text = gather_metrics()?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create metrics directory {}", dir.display()))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    temp.write_all(text.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    Ok(())
}
