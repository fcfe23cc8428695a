//! Operator process configuration
//!
//! [`OperatorConfig`] is a clap `Args` struct so operator binaries can
//! `#[command(flatten)]` it next to their own flags. Every field can also be
//! set from the environment, which is how it is usually supplied in-cluster.

use std::time::Duration;

use clap::Args;

use crate::telemetry::TelemetryConfig;

/// Settings shared by every controller an operator runs
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Name of the operator; used as service name and in log/span fields
    #[arg(long, env = "OPERATOR_NAME", default_value = "converge")]
    pub operator_name: String,

    /// Upper bound on reconciles running in parallel per controller
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 10)]
    pub max_concurrent_reconciles: u16,

    /// Only reconcile resources labelled `converge.dev/debug=<value>`.
    /// When empty, resources carrying that label are ignored instead.
    #[arg(long, env = "DEBUG_LABEL_VALUE", default_value = "")]
    pub debug_label_value: String,

    /// Delay before a retryable failure is reconciled again
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 5)]
    pub error_requeue_secs: u64,

    /// Log filter directives (`EnvFilter` syntax)
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_name: "converge".to_string(),
            max_concurrent_reconciles: 10,
            debug_label_value: String::new(),
            error_requeue_secs: 5,
            log_filter: None,
            otlp_endpoint: None,
        }
    }
}

impl OperatorConfig {
    /// Delay applied by the controller error policy to retryable failures
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Telemetry settings derived from this configuration
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            operator_name: self.operator_name.clone(),
            log_filter: self.log_filter.clone(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            debug_label_value: self.debug_label_value.clone(),
        }
    }
}
