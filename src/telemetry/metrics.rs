//! Metric instrument factories for flagctx.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"flagctx"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for flagctx instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("flagctx")
}

/// Counter: flag operations issued.
/// Labels: `key`, `operation`, `result` ("modified" | "unchanged" | "not_started" | "error").
pub fn flag_operations() -> Counter<u64> {
    meter()
        .u64_counter("flagctx.flag.operations")
        .with_description("Number of flag operations")
        .build()
}

/// Counter: duplicate flag records removed by deduplication.
/// Labels: `key`.
pub fn duplicates_removed() -> Counter<u64> {
    meter()
        .u64_counter("flagctx.flag.duplicates_removed")
        .with_description("Duplicate flag records removed")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("flagctx.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
