//! Integration tests for telemetry initialization and span helpers.

#[test]
fn telemetry_initializes_without_endpoint() {
    // Only one global subscriber per process; a second init may return Err.
    let config = workq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "workq-test".to_string(),
        log_level: "debug".to_string(),
    };
    if let Ok(guard) = workq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn work_span_creates_and_records_outcome() {
    let span = workq::telemetry::work::start_work_span("t1", 2);
    workq::telemetry::work::record_outcome(&span, "failed");
}

#[test]
fn metric_instruments_accept_recordings_without_exporter() {
    use opentelemetry::KeyValue;
    use workq::telemetry::metrics;

    metrics::work_submitted().add(1, &[KeyValue::new("result", "created")]);
    metrics::work_processed().add(1, &[]);
    metrics::work_failed().add(1, &[]);
    metrics::work_dead_lettered().add(1, &[]);
    metrics::retry_scheduled().add(1, &[]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "test")]);
}
