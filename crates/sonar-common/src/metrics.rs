//! Metrics registry for SONAR agent observability
//!
//! Instruments are created lazily on the global meter, so they are no-ops
//! until telemetry installs an OTLP meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for SONAR agent metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("sonar"));

/// Counter of processed reconciliation events
///
/// Labels:
/// - `resource`: namespace, config_fragment
/// - `change`: added, modified, deleted
/// - `result`: success, error
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("sonar_reconcile_total")
        .with_description("Total number of reconciliation events processed")
        .with_unit("{events}")
        .build()
});

/// Histogram of reconciliation duration
///
/// Labels:
/// - `resource`: namespace, config_fragment
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("sonar_reconcile_duration_seconds")
        .with_description("Duration of a single event reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of watch stream failures
///
/// Labels:
/// - `resource`: namespace, config_fragment
pub static WATCH_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("sonar_watch_errors_total")
        .with_description("Total number of watch stream errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of configuration fragments rejected by validation
pub static FRAGMENTS_REJECTED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("sonar_fragments_rejected_total")
        .with_description("Total number of configuration fragments that failed validation")
        .with_unit("{fragments}")
        .build()
});

/// Counter of remote configuration store calls
///
/// Labels:
/// - `operation`: configure, delete
/// - `result`: success, error
pub static REMOTE_CALLS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("sonar_remote_calls_total")
        .with_description("Total number of remote configuration store calls")
        .with_unit("{calls}")
        .build()
});

/// Gauge of live per-namespace reconciliation workers
pub static ACTIVE_WORKERS: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("sonar_active_workers")
        .with_description("Number of live per-namespace reconciliation workers")
        .with_unit("{workers}")
        .build()
});

/// Outcome label value for a result
pub fn result_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}

/// Record one processed reconciliation event
pub fn record_reconcile(resource: &'static str, change: &'static str, result: &'static str, secs: f64) {
    RECONCILE_TOTAL.add(
        1,
        &[
            KeyValue::new("resource", resource),
            KeyValue::new("change", change),
            KeyValue::new("result", result),
        ],
    );
    RECONCILE_DURATION.record(secs, &[KeyValue::new("resource", resource)]);
}

/// Record one remote store call
pub fn record_remote_call(operation: &'static str, result: &'static str) {
    REMOTE_CALLS.add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}

/// Record a watch stream error
pub fn record_watch_error(resource: &'static str) {
    WATCH_ERRORS.add(1, &[KeyValue::new("resource", resource)]);
}
