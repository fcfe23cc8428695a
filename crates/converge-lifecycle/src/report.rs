//! Error reporting
//!
//! Failures that the code producing them marked as reportable are forwarded
//! to an [`ErrorReporter`], together with tags identifying the reconcile.
//! Reporting is fire-and-forget and never affects the reconcile result.

#[cfg(test)]
use mockall::automock;
use tracing::error;
use uuid::Uuid;

use converge_common::{Error, REPORT_TARGET};

use crate::resource::ResourceId;

/// Tags attached to every reported error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportTags {
    /// Operator name
    pub operator: String,
    /// Controller name
    pub controller: String,
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
    /// Correlation id of the reconcile
    pub reconcile_id: Uuid,
}

impl ReportTags {
    /// Tags for one reconcile of `resource`
    pub fn new(operator: &str, controller: &str, resource: &ResourceId, reconcile_id: Uuid) -> Self {
        Self {
            operator: operator.to_string(),
            controller: controller.to_string(),
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
            reconcile_id,
        }
    }
}

/// Sink for reportable errors
#[cfg_attr(test, automock)]
pub trait ErrorReporter: Send + Sync {
    /// Record `error`; must not block or fail
    fn capture(&self, error: &Error, tags: &ReportTags);
}

/// Reporter that emits an `error` event on [`REPORT_TARGET`]
///
/// The telemetry subscriber writes these events to their own stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, err: &Error, tags: &ReportTags) {
        error!(
            target: REPORT_TARGET,
            operator = %tags.operator,
            controller = %tags.controller,
            namespace = %tags.namespace,
            name = %tags.name,
            reconcile_id = %tags.reconcile_id,
            subroutine = err.subroutine_name().unwrap_or_default(),
            error = %err,
            "reconcile error"
        );
    }
}

/// Forward `err` to the reporter when its classification asks for it
pub fn report(reporter: &dyn ErrorReporter, err: &Error, tags: &ReportTags) {
    if err.should_report() {
        reporter.capture(err, tags);
    }
}
