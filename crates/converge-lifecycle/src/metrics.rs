//! Reconcile metrics
//!
//! Instruments are registered on the global OpenTelemetry meter, which
//! `converge_common::telemetry::init_telemetry` wires to an OTLP exporter.
//! Without an exporter the global meter is a no-op.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("converge"));

/// Counter of finished reconciles
///
/// Labels:
/// - `controller`: controller name
/// - `result`: success, requeue, error, skipped, not_found
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_reconcile_total")
        .with_description("Total number of reconciles by result")
        .with_unit("{reconciles}")
        .build()
});

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: controller name
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("converge_reconcile_duration_seconds")
        .with_description("Duration of reconciles in seconds")
        .with_unit("s")
        .build()
});

/// Counter of subroutine failures
///
/// Labels:
/// - `controller`: controller name
/// - `subroutine`: subroutine name
/// - `retry`: whether the failure asked for a retry
pub static SUBROUTINE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_subroutine_errors_total")
        .with_description("Total number of subroutine errors")
        .with_unit("{errors}")
        .build()
});

/// How a reconcile ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Converged, nothing requeued
    Success,
    /// Finished but asked to run again
    Requeue,
    /// Returned an error
    Error,
    /// Skipped by the spread scheduler
    Skipped,
    /// Resource no longer exists
    NotFound,
}

impl ReconcileResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeue => "requeue",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::NotFound => "not_found",
        }
    }
}

/// Times one reconcile and records its result once finished
pub struct ReconcileTimer {
    controller: String,
    start: Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile
    pub fn start(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            start: Instant::now(),
        }
    }

    /// Record duration and result
    pub fn finish(self, result: ReconcileResult) {
        let duration = self.start.elapsed().as_secs_f64();
        RECONCILE_DURATION.record(
            duration,
            &[KeyValue::new("controller", self.controller.clone())],
        );
        RECONCILE_TOTAL.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", result.as_str()),
            ],
        );
    }
}

/// Count a failed subroutine step
pub fn record_subroutine_error(controller: &str, subroutine: &str, retry: bool) {
    SUBROUTINE_ERRORS.add(
        1,
        &[
            KeyValue::new("controller", controller.to_string()),
            KeyValue::new("subroutine", subroutine.to_string()),
            KeyValue::new("retry", retry),
        ],
    );
}
