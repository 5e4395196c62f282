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

    // Store Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Correction pipeline
    pub static ref CORRECTION_STATUS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "prologin_correction_status",
        "Problem submission correction status",
        &["problem", "status"]
    )
    .unwrap();

    pub static ref CORRECTION_SCORE: HistogramVec = register_histogram_vec!(
        "prologin_correction_score",
        "Problem submission score by problem",
        &["problem"],
        vec![0.0, 16.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0]
    )
    .unwrap();

    pub static ref CORRECTOR_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "corrector_request_duration_seconds",
        "Round-trip time of corrector requests",
        &["endpoint", "status"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]
    )
    .unwrap();

    pub static ref CORRECTION_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "correction_tasks_total",
        "Correction task invocations by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref CORRECTION_TASKS_ACTIVE: IntGauge = register_int_gauge!(
        "correction_tasks_active",
        "Number of correction tasks currently running"
    )
    .unwrap();

    pub static ref QUEUE_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "correction_queue_jobs_total",
        "Correction queue events",
        &["event"]
    )
    .unwrap();

    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "code_submissions_total",
        "Total number of code submissions",
        &["language"]
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

/// Helper: track a store operation with metrics
pub async fn track_db_operation<F, T, E>(operation: &str, collection: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_queue_event(event: &str) {
    QUEUE_JOBS_TOTAL.with_label_values(&[event]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = CORRECTION_STATUS_TOTAL
            .with_label_values(&["qcm2015/sum", "ok"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        CORRECTION_SCORE
            .with_label_values(&["qcm2015/sum"])
            .observe(256.0);
        record_queue_event("enqueued");

        let output = render_metrics().unwrap();
        assert!(output.contains("prologin_correction_score"));
        assert!(output.contains("correction_queue_jobs_total"));
    }

    #[tokio::test]
    async fn track_db_operation_counts_errors() {
        let before = DB_OPERATIONS_TOTAL
            .with_label_values(&["find", "metrics_test", "error"])
            .get();
        let result: Result<(), &str> =
            track_db_operation("find", "metrics_test", async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(
            DB_OPERATIONS_TOTAL
                .with_label_values(&["find", "metrics_test", "error"])
                .get(),
            before + 1
        );
    }
}
