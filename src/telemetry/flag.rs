//! Flag operation span helpers.

use tracing::Span;

use crate::model::{EntityId, Outcome};

/// Start a span for one flag operation.
///
/// The `flag.outcome` field is declared empty and filled in by
/// [`record_outcome`] once the store has answered.
pub fn start_flag_span(operation: &'static str, key: &str, entity: &EntityId) -> Span {
    tracing::info_span!(
        "flag.operation",
        "flag.operation" = operation,
        "flag.key" = key,
        "flag.entity" = %entity,
        "flag.outcome" = tracing::field::Empty,
    )
}

/// Record the operation's outcome on its span.
pub fn record_outcome(span: &Span, outcome: Outcome) {
    span.record("flag.outcome", tracing::field::display(outcome));
}
