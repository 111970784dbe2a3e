use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder};

// Prometheus metrics (default registry)
pub static AUTH_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gcs_gateway_auth_rejected_total",
        "Total requests rejected by the API key check"
    )
    .expect("register auth_rejected_total")
});

pub static OBJECT_READS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gcs_gateway_object_reads_total",
        "Total object reads attempted"
    )
    .expect("register object_reads_total")
});

pub static OBJECT_READ_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gcs_gateway_object_read_errors_total",
        "Total object reads that failed"
    )
    .expect("register object_read_errors_total")
});

pub static OBJECT_READ_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gcs_gateway_object_read_duration_seconds",
        "Object read duration in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("register object_read_duration")
});

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
