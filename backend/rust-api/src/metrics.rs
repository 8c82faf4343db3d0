use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Session Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sessions_total",
        "Total number of diagnosis sessions",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sessions_active",
        "Number of currently connected sessions"
    )
    .unwrap();

    pub static ref INTENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "intents_total",
        "Total number of client intents processed",
        &["intent", "outcome"]
    )
    .unwrap();

    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submissions_total",
        "Total number of test and diagnosis submissions",
        &["stage", "correct"]
    )
    .unwrap();

    // Feedback Generator Metrics
    pub static ref FEEDBACK_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feedback_requests_total",
        "Total number of narration requests by prompt kind and source",
        &["kind", "source"]
    )
    .unwrap();

    pub static ref FEEDBACK_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "feedback_duration_seconds",
        "Time spent producing narration, including fallback",
        &["kind"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_submission(stage: &str, correct: bool) {
    let correct_label = if correct { "true" } else { "false" };
    SUBMISSIONS_TOTAL
        .with_label_values(&[stage, correct_label])
        .inc();
}
