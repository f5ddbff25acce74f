//! Work execution span helpers.

use tracing::Span;

/// Start a span for one processing attempt of a work item.
///
/// The `work.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_work_span(work_id: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.id" = work_id,
        "work.attempt" = attempt,
        "work.outcome" = tracing::field::Empty,
    )
}

/// Record how an attempt ended ("processed" | "failed").
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("work.outcome", outcome);
}
