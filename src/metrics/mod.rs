//! Process-wide prometheus metrics for pipelines and module lifecycles

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramOpts, HistogramVec,
    IntCounterVec, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
];

static PIPELINE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_pipeline_requests_total",
        "Requests executed per execution path",
        &["path"]
    )
    .expect("Failed to register prometheus metric: folio_pipeline_requests_total")
});

static PIPELINE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_pipeline_errors_total",
        "Requests routed to the error handler per execution path",
        &["path"]
    )
    .expect("Failed to register prometheus metric: folio_pipeline_errors_total")
});

static PIPELINE_SHORT_CIRCUITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_pipeline_short_circuits_total",
        "Requests ended by a stage that did not continue",
        &["path", "stage"]
    )
    .expect("Failed to register prometheus metric: folio_pipeline_short_circuits_total")
});

static PIPELINE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "folio_pipeline_latency_ms",
        "Execution path latency in milliseconds",
    )
    .buckets(LATENCY_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["path"])
        .expect("Failed to register prometheus metric: folio_pipeline_latency_ms")
});

static MODULE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "folio_module_transitions_total",
        "Module lifecycle transitions by outcome",
        &["module", "transition", "outcome"]
    )
    .expect("Failed to register prometheus metric: folio_module_transitions_total")
});

pub fn record_request(path: &str, elapsed_ms: f64) {
    PIPELINE_REQUESTS.with_label_values(&[path]).inc();
    PIPELINE_LATENCY.with_label_values(&[path]).observe(elapsed_ms);
}

pub fn record_error(path: &str) {
    PIPELINE_ERRORS.with_label_values(&[path]).inc();
}

pub fn record_short_circuit(path: &str, stage: &str) {
    PIPELINE_SHORT_CIRCUITS
        .with_label_values(&[path, stage])
        .inc();
}

pub fn record_transition(module: &str, transition: &str, success: bool) {
    let outcome = if success { "ok" } else { "failed" };
    MODULE_TRANSITIONS
        .with_label_values(&[module, transition, outcome])
        .inc();
}

/// Encode all registered metrics in the prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("Failed to encode prometheus metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
