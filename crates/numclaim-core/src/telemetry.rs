//! # Telemetry
//!
//! Both binaries always log through `tracing` to the console. OpenTelemetry
//! export is optional and selected with cargo features.
//!
//! ## Feature matrix
//!
//! - `otel`: Enables OpenTelemetry distributed tracing (via spans), exported
//!   over OTLP/HTTP. The endpoint is read from the standard
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` environment variable.
//! - `metrics`: Enables OpenTelemetry metrics (counters, histograms), exported
//!   over OTLP/HTTP.
//! - `stdout`: Additionally exports spans and metrics to stdout.
//!
//! ## Feature constraints
//!
//! - `stdout` requires at least one of `otel` or `metrics`.
//!
//! ## Span behavior
//!
//! - Spans created via `tracing::info_span!` or `#[tracing::instrument]` are
//!   exported to any enabled telemetry backend.
//! - Events outside of a span are only shown in log output (via the `fmt`
//!   layer), not exported.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run -p numclaim-gateway --features otel,metrics
//! cargo run -p numclaim-backend --features otel,stdout
//! ```

// Disallow using `stdout` without `otel` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use core::{fmt, str::FromStr};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "otel", feature = "metrics"))]
pub use opentelemetry;

#[cfg(any(feature = "otel", feature = "metrics"))]
use anyhow::Context;
#[cfg(any(feature = "otel", feature = "metrics"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "otel", feature = "metrics"))]
use opentelemetry_otlp::{Protocol, WithExportConfig};
#[cfg(any(feature = "otel", feature = "metrics"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "otel", feature = "metrics"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

/// Console log layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log format `{0}` (expected `pretty` or `json`)")]
pub struct ParseLogFormatError(String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ParseLogFormatError(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Providers that must outlive the server so buffered telemetry can be
/// flushed on exit.
pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Errors are printed to
    /// stderr since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {:#?}", err);
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {:#?}", err);
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {:#?}", err);
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {:#?}", err);
            }
        }
    }
}

/// Installs the global subscriber for `service_name`.
///
/// # Errors
///
/// Fails if an enabled exporter cannot be built.
pub fn init_telemetry(
    service_name: &'static str,
    format: LogFormat,
) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer(service_name)?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(service_name)?;

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
            ),
        ),
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json);

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope(service_name)))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();
    tracing::debug!(service = service_name, %format, "telemetry initialized");

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Meter scoped to `service_name`, for building metric instruments after
/// [`init_telemetry`] has installed the global meter provider.
#[cfg(feature = "metrics")]
pub fn meter(service_name: &'static str) -> opentelemetry::metrics::Meter {
    opentelemetry::global::meter_with_scope(scope(service_name))
}

#[cfg(any(feature = "otel", feature = "metrics"))]
fn scope(service_name: &'static str) -> InstrumentationScope {
    InstrumentationScope::builder(service_name)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build()
}

#[cfg(any(feature = "otel", feature = "metrics"))]
fn resource(service_name: &'static str) -> Resource {
    Resource::builder()
        .with_service_name(service_name)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics(service_name: &'static str) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_timeout(std::time::Duration::from_secs(10))
        .with_temporality(sdkmetrics::Temporality::Delta)
        .build()
        .context("failed to build metrics exporter")?;

    Ok(builder.with_periodic_exporter(exporter).build())
}

#[cfg(feature = "otel")]
fn init_tracer(service_name: &'static str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_timeout(std::time::Duration::from_secs(10))
        .build()
        .context("failed to build span exporter")?;

    let batch = sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build();

    Ok(builder.with_span_processor(batch).build())
}
