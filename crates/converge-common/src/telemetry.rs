//! Process telemetry for an operator
//!
//! Two log streams leave the process. The regular JSON log goes to stdout and
//! follows the configured filter. Reported reconcile errors, the events on
//! [`REPORT_TARGET`], go to stderr on their own layer that no log filter can
//! silence, so alerting can tail a single stream. With an OTLP endpoint the
//! reconcile spans and metrics are exported too.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Target of the events emitted for reported reconcile errors
pub const REPORT_TARGET: &str = "converge::report";

/// Filter used when no log filter is configured
const DEFAULT_LOG_FILTER: &str = "info,converge=debug,kube=info,tower=warn,hyper=warn";

/// Resource attribute naming the debug label value an instance serves
const DEBUG_LABEL_ATTRIBUTE: &str = "converge.debug_label_value";

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter does not parse
    #[error("invalid log filter {filter:?}: {message}")]
    Filter {
        /// Offending filter
        filter: String,
        /// Parser message
        message: String,
    },

    /// An OTLP exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// `spans` or `metrics`
        signal: &'static str,
        /// Exporter message
        message: String,
    },

    /// Another global subscriber was installed first
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Telemetry settings, derived from [`crate::config::OperatorConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Operator name, exported as the service name
    pub operator_name: String,
    /// `EnvFilter` directives for the regular log
    pub log_filter: Option<String>,
    /// OTLP collector endpoint; no export when unset
    pub otlp_endpoint: Option<String>,
    /// Debug label value this instance serves; empty for the main instance
    pub debug_label_value: String,
}

impl TelemetryConfig {
    /// Filter for the regular log and span export
    ///
    /// Report events are always excluded here; they have their own layer.
    fn log_filter(&self) -> Result<EnvFilter, TelemetryError> {
        let directives = self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
        let invalid = |message: String| TelemetryError::Filter {
            filter: directives.to_string(),
            message,
        };

        let report_off: Directive = format!("{REPORT_TARGET}=off")
            .parse()
            .map_err(|e: tracing_subscriber::filter::ParseError| invalid(e.to_string()))?;
        EnvFilter::try_new(directives)
            .map(|filter| filter.add_directive(report_off))
            .map_err(|e| invalid(e.to_string()))
    }

    /// OpenTelemetry resource describing this operator instance
    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new(SERVICE_NAME, self.operator_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ];
        if !self.debug_label_value.is_empty() {
            attributes.push(KeyValue::new(
                DEBUG_LABEL_ATTRIBUTE,
                self.debug_label_value.clone(),
            ));
        }
        Resource::new(attributes)
    }
}

/// Filter for the report layer: error events on [`REPORT_TARGET`] only
fn report_filter() -> Targets {
    Targets::new().with_target(REPORT_TARGET, LevelFilter::ERROR)
}

struct OtlpExporters {
    tracer: TracerProvider,
    meter: SdkMeterProvider,
}

impl OtlpExporters {
    fn install(endpoint: &str, resource: Resource) -> Result<Self, TelemetryError> {
        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter {
                signal: "spans",
                message: e.to_string(),
            })?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter {
                signal: "metrics",
                message: e.to_string(),
            })?;

        let tracer = TracerProvider::builder()
            .with_batch_exporter(spans, runtime::Tokio)
            .with_resource(resource.clone())
            .build();
        let meter = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(metrics, runtime::Tokio).build())
            .with_resource(resource)
            .build();

        global::set_tracer_provider(tracer.clone());
        global::set_meter_provider(meter.clone());
        Ok(Self { tracer, meter })
    }
}

/// Keeps the OTLP pipelines alive; call [`TelemetryGuard::shutdown`] on exit
#[must_use = "spans buffered at exit are lost unless the guard is shut down"]
pub struct TelemetryGuard {
    exporters: Option<OtlpExporters>,
}

impl TelemetryGuard {
    /// True when spans and metrics are exported over OTLP
    pub fn is_exporting(&self) -> bool {
        self.exporters.is_some()
    }

    /// Flush and stop the exporters
    pub fn shutdown(self) {
        let Some(exporters) = self.exporters else {
            return;
        };
        if let Err(e) = exporters.tracer.shutdown() {
            warn!(error = %e, "failed to flush spans");
        }
        if let Err(e) = exporters.meter.shutdown() {
            warn!(error = %e, "failed to flush metrics");
        }
    }
}

/// Install the global subscriber for an operator process
///
/// Must be called once, from inside a tokio runtime when an OTLP endpoint is
/// configured (the batch exporters spawn onto it).
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporters = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| OtlpExporters::install(endpoint, config.resource()))
        .transpose()?;

    let otel_layer = match &exporters {
        Some(exporters) => {
            let tracer = exporters.tracer.tracer(config.operator_name.clone());
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(config.log_filter()?),
            )
        }
        None => None,
    };

    let log_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_filter(config.log_filter()?);

    let report_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(true)
        .with_filter(report_filter());

    tracing_subscriber::registry()
        .with(log_layer)
        .with(report_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInstalled)?;

    Ok(TelemetryGuard { exporters })
}
