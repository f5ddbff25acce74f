//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: submissions through the admission path.
/// Labels: `work_type`, `result` ("created" | "existing").
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.submitted")
        .with_description("Number of work submissions")
        .build()
}

/// Counter: successful processing calls.
pub fn work_processed() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.processed")
        .with_description("Number of work items processed successfully")
        .build()
}

/// Counter: failed processing calls, retried or not.
pub fn work_failed() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.failed")
        .with_description("Number of failed processing attempts")
        .build()
}

/// Counter: items that exhausted their retry budget.
pub fn work_dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.dead_lettered")
        .with_description("Number of work items dead-lettered")
        .build()
}

/// Counter: retry timers armed.
pub fn retry_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("workq.retry.scheduled")
        .with_description("Number of retries scheduled")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
