//! Metrics module
//!
//! Prometheus metrics for the upload engine, rendered in the text
//! exposition format by [`gather`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "resumable_uploads_total",
        "Total number of finished uploads",
        &["status"]  // "success", "failure" or "cancelled"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "resumable_upload_bytes_total",
        "Total bytes acknowledged by the server"
    ).unwrap();

    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "resumable_upload_duration_seconds",
        "Time from first send to terminal outcome",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // Chunk metrics
    pub static ref CHUNKS_TOTAL: CounterVec = register_counter_vec!(
        "resumable_chunks_total",
        "Chunks sent, by outcome",
        &["outcome"]  // "success" or "failure"
    ).unwrap();

    // Retry and resume metrics
    pub static ref AUTO_RETRIES_TOTAL: Counter = register_counter!(
        "resumable_auto_retries_total",
        "Automatic retries scheduled"
    ).unwrap();

    pub static ref RESUMES_TOTAL: Counter = register_counter!(
        "resumable_checkpoint_resumes_total",
        "Uploads continued from a persisted checkpoint"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "resumable_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_DURATION.observe(duration_secs);
}

/// Record a terminally failed upload
pub fn record_upload_failure(duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
    UPLOAD_DURATION.observe(duration_secs);
}

pub fn record_upload_cancelled() {
    UPLOADS_TOTAL.with_label_values(&["cancelled"]).inc();
}

/// Record the outcome of one request (a chunk or a whole file)
pub fn record_chunk(bytes: u64, success: bool) {
    if success {
        CHUNKS_TOTAL.with_label_values(&["success"]).inc();
        UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    } else {
        CHUNKS_TOTAL.with_label_values(&["failure"]).inc();
    }
}

pub fn record_auto_retry() {
    AUTO_RETRIES_TOTAL.inc();
}

pub fn record_resume() {
    RESUMES_TOTAL.inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
