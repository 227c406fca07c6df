//! Prometheus metrics for consignment-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database operation duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "consignment_db_query_duration_seconds",
        "Database operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for consignment status transitions.
pub static STATUS_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "consignment_status_transitions_total",
        "Total number of consignment status transitions",
        &["action"]
    )
    .expect("Failed to register STATUS_TRANSITIONS")
});

/// Counter for challan operations by type and outcome.
pub static CHALLAN_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "consignment_challan_operations_total",
        "Total number of challan operations",
        &["operation", "status"]
    )
    .expect("Failed to register CHALLAN_OPERATIONS")
});

/// Force registration of all metrics at startup.
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&STATUS_TRANSITIONS);
    Lazy::force(&CHALLAN_OPERATIONS);
}

/// Gather and encode all registered metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
