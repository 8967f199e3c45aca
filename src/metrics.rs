// Prometheus metrics for provider operations
//
// - Lifecycle operation outcomes (counter by operation and status)
// - Nodes returned by the last listing (gauge)
// - Nodes skipped during listing (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("provider_operations_total", "Provider operations by outcome"),
        &["operation", "status"]
    ).expect("Failed to create provider operations metric");

    pub static ref NODES_LISTED: IntGauge = IntGauge::new(
        "provider_nodes_listed",
        "Nodes returned by the most recent listing"
    ).expect("Failed to create nodes listed metric");

    pub static ref NODES_SKIPPED_TOTAL: IntCounter = IntCounter::new(
        "provider_nodes_skipped_total",
        "Nodes left out of a listing because they did not answer or reported malformed grains"
    ).expect("Failed to create nodes skipped metric");
}

/// Register all metrics - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NODES_LISTED.clone()))?;
    REGISTRY.register(Box::new(NODES_SKIPPED_TOTAL.clone()))?;
    Ok(())
}

/// Count one lifecycle operation
pub fn record_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    OPERATIONS_TOTAL.with_label_values(&[operation, status]).inc();
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
