//! Common types for converge: CRD status types, errors, telemetry, and configuration

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::{Error, OperatorError};
pub use telemetry::REPORT_TARGET;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label that forces a spread-reconciled resource to be processed on its next trigger
pub const REFRESH_RECONCILE_LABEL: &str = "converge.dev/refresh-reconcile";

/// Label used to route resources to a debug instance of a controller
pub const DEBUG_LABEL: &str = "converge.dev/debug";
