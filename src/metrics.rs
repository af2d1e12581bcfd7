// Prometheus metrics for the ScriptGate service
//
// Exposed on the /metrics HTTP endpoint:
// - Script executions by outcome (counter)
// - Script execution durations (histogram)
// - Rejected requests by reason (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, Once};
use std::time::Duration;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref SCRIPT_EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("script_executions_total", "Total number of script executions"),
        &["script", "status"]
    ).expect("Failed to create script executions metric");

    pub static ref SCRIPT_EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("script_execution_duration_seconds", "Script execution duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["script"]
    ).expect("Failed to create script execution duration metric");

    pub static ref REQUESTS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("requests_rejected_total", "Total number of rejected requests"),
        &["reason"]
    ).expect("Failed to create requests rejected metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SCRIPT_EXECUTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCRIPT_EXECUTION_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_REJECTED_TOTAL.clone()))?;
    Ok(())
}

/// Record a finished execution
pub fn record_execution(script: &str, status: &str, duration: Duration) {
    SCRIPT_EXECUTIONS_TOTAL.with_label_values(&[script, status]).inc();
    SCRIPT_EXECUTION_DURATION_SECONDS
        .with_label_values(&[script])
        .observe(duration.as_secs_f64());
}

/// Record a request refused before execution
pub fn record_rejection(reason: &str) {
    REQUESTS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
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
