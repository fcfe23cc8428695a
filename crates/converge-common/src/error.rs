//! Error types for converge controllers
//!
//! Two layers of errors exist:
//! - [`OperatorError`] is what a subroutine returns. It carries the author's
//!   decision on whether the failure should be retried and whether it should
//!   be forwarded to the error-reporting sink.
//! - [`Error`] is what the lifecycle manager surfaces to its caller. Every
//!   variant answers [`Error::is_retryable`] and [`Error::should_report`] so
//!   the controller runtime and the reporter never need to inspect causes.

use std::fmt;

use thiserror::Error;

/// Boxed error source carried by an [`OperatorError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API (resource store) error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A subroutine failed while processing or finalizing a resource
    #[error("subroutine {subroutine} failed: {source}")]
    Subroutine {
        /// Name of the failing subroutine
        subroutine: String,
        /// The classified failure returned by the subroutine
        #[source]
        source: OperatorError,
    },

    /// The controller was wired up incorrectly; retrying will not help
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what is misconfigured
        message: String,
    },

    /// The reconcile was cancelled by its caller
    #[error("reconcile cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "controller")
        context: String,
    },
}

impl Error {
    /// Wrap a classified subroutine failure
    pub fn subroutine(subroutine: impl Into<String>, source: OperatorError) -> Self {
        Self::Subroutine {
            subroutine: subroutine.into(),
            source,
        }
    }

    /// Create a configuration (programming) error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if the caller should schedule this reconcile again
    ///
    /// Store errors always retry. Subroutine errors follow the flag chosen by
    /// the subroutine author. Configuration errors and cancellations never
    /// heal by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::Subroutine { source, .. } => source.retry(),
            Error::Configuration { .. } => false,
            Error::Cancelled => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error should be forwarded to the error-reporting sink
    ///
    /// Optimistic-concurrency conflicts are expected under load and are
    /// not reported.
    pub fn should_report(&self) -> bool {
        match self {
            Error::Kube { .. } => !self.is_conflict(),
            Error::Subroutine { source, .. } => source.report(),
            Error::Configuration { .. } => true,
            Error::Cancelled => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the store rejected a write because of a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// True when the store reports the resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Name of the subroutine that produced this error, if any
    pub fn subroutine_name(&self) -> Option<&str> {
        match self {
            Error::Subroutine { subroutine, .. } => Some(subroutine),
            _ => None,
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }
}

/// A failure classified by the code that produced it
///
/// `retry` decides whether the caller reschedules the reconcile; `report`
/// decides whether the failure is sent to the error-reporting sink. The two
/// flags are independent.
pub struct OperatorError {
    source: BoxError,
    retry: bool,
    report: bool,
}

impl OperatorError {
    /// Create a classified error with explicit flags
    pub fn new(source: impl Into<BoxError>, retry: bool, report: bool) -> Self {
        Self {
            source: source.into(),
            retry,
            report,
        }
    }

    /// A transient failure: retried and reported
    pub fn retryable(source: impl Into<BoxError>) -> Self {
        Self::new(source, true, true)
    }

    /// A permanent failure: not retried, reported
    pub fn permanent(source: impl Into<BoxError>) -> Self {
        Self::new(source, false, true)
    }

    /// Mark this error for reporting
    pub fn reported(mut self) -> Self {
        self.report = true;
        self
    }

    /// Keep this error out of the reporting sink
    pub fn unreported(mut self) -> Self {
        self.report = false;
        self
    }

    /// Whether the caller should reschedule the reconcile
    pub fn retry(&self) -> bool {
        self.retry
    }

    /// Whether the failure should be sent to the reporting sink
    pub fn report(&self) -> bool {
        self.report
    }

    /// The underlying failure
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

impl fmt::Debug for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorError")
            .field("source", &self.source)
            .field("retry", &self.retry)
            .field("report", &self.report)
            .finish()
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl std::error::Error for OperatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

impl From<Error> for OperatorError {
    fn from(err: Error) -> Self {
        let retry = err.is_retryable();
        let report = err.should_report();
        Self::new(err, retry, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from test"),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: store failures are retried, and reported unless they are conflicts
    #[test]
    fn story_store_errors_retry_and_skip_reporting_conflicts() {
        let err = api_error(500, "InternalError");
        assert!(err.is_retryable());
        assert!(err.should_report());
        assert!(!err.is_conflict());

        let err = api_error(409, "Conflict");
        assert!(err.is_retryable());
        assert!(!err.should_report());
        assert!(err.is_conflict());

        let err = api_error(404, "NotFound");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    /// Story: subroutine authors decide retry and report independently
    #[test]
    fn story_subroutine_flags_drive_classification() {
        let err = Error::subroutine("dns", OperatorError::new("zone busy", true, false));
        assert!(err.is_retryable());
        assert!(!err.should_report());
        assert_eq!(err.subroutine_name(), Some("dns"));
        assert!(err.to_string().contains("subroutine dns failed: zone busy"));

        let err = Error::subroutine("dns", OperatorError::permanent("bad zone name"));
        assert!(!err.is_retryable());
        assert!(err.should_report());
    }

    #[test]
    fn test_operator_error_flag_builders() {
        let err = OperatorError::retryable("flaky").unreported();
        assert!(err.retry());
        assert!(!err.report());

        let err = OperatorError::new("x", false, false).reported();
        assert!(!err.retry());
        assert!(err.report());
        assert_eq!(err.to_string(), "x");
    }

    #[test]
    fn test_configuration_errors_are_fatal_and_reported() {
        let err = Error::configuration("duplicate subroutine name");
        assert!(!err.is_retryable());
        assert!(err.should_report());
        assert!(err.to_string().contains("duplicate subroutine name"));
    }

    #[test]
    fn test_cancellation_is_fatal_and_quiet() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Cancelled.should_report());
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("store", "unexpected state");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[store]"));

        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains(UNKNOWN_CONTEXT));
    }

    #[test]
    fn test_error_converts_into_operator_error_keeping_flags() {
        let op: OperatorError = api_error(409, "Conflict").into();
        assert!(op.retry());
        assert!(!op.report());
    }
}
