//! # Telemetry Features
//!
//! Logging through `tracing` is always on. OpenTelemetry export of spans and
//! metrics is optional and selected with cargo features.
//!
//! ## Feature matrix
//!
//! - `otel`: Exports `tracing` spans as OpenTelemetry traces.
//! - `metrics`: Records call metrics (counts, durations, partial results,
//!   timeouts, stream errors) as OpenTelemetry instruments.
//! - `otlp`: Enables the OTLP/gRPC exporter.
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of `otel` or `metrics`.
//! - `otlp` and `stdout` can be enabled at the same time.
//!
//! ## OTLP settings
//!
//! - `OTLP_ENDPOINT` (required): collector address. `https://` endpoints use
//!   TLS with the platform's native roots.
//! - `OTLP_HEADERS` (optional): `key=value` pairs separated by commas, sent as
//!   gRPC metadata (e.g. an API key).
//! - `OTLP_COMPRESSION` (optional, default `gzip`): `gzip` or `zstd`.
//!
//! ## Log output
//!
//! Events go to stderr through `fmt::layer()`, filtered by `RUST_LOG`
//! (default `info`). Stdout is left to the client's own output.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --bin greeter-client --features otel,metrics,otlp -- server-stream
//! cargo run --bin greeter-client --features otel,stdout -- bidi Alice Bob
//! ```

#[cfg(all(feature = "otlp", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'otel' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use crate::dispatch::CallShape;
#[cfg(feature = "metrics")]
use crate::outcome::Completion;
use crate::outcome::CallOutcome;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "otel")))]
use opentelemetry_otlp::{Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "otlp")]
use tonic::metadata::{AsciiMetadataKey, MetadataMap};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "metrics", feature = "otel"))]
const SERVICE_NAME: &str = "greeter-bridge";

pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending exports and shuts the providers down. Failures are
    /// printed to stderr since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber and, when enabled, the OpenTelemetry
/// providers.
///
/// The OTLP exporter builds on tonic, so with `otlp` enabled this must run
/// inside a Tokio runtime context (e.g. under `Runtime::enter`).
///
/// # Errors
///
/// Fails if an exporter cannot be configured from the environment.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .compact(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "otlp")]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    compression: opentelemetry_otlp::Compression,
}

#[cfg(feature = "otlp")]
impl OtlpSettings {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use std::str::FromStr;

        let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;
        let metadata = parse_headers(&std::env::var("OTLP_HEADERS").unwrap_or_default())?;
        let raw = std::env::var("OTLP_COMPRESSION")
            .unwrap_or_else(|_| "gzip".to_string())
            .to_ascii_lowercase();
        let compression = opentelemetry_otlp::Compression::from_str(&raw)
            .with_context(|| format!("invalid `OTLP_COMPRESSION`: {raw}"))?;

        Ok(Self {
            endpoint,
            metadata,
            compression,
        })
    }

    fn tls(&self) -> Option<tonic::transport::ClientTlsConfig> {
        self.endpoint
            .starts_with("https://")
            .then(|| tonic::transport::ClientTlsConfig::new().with_native_roots())
    }
}

/// Parses `key=value,key=value` into gRPC metadata. Blank entries are skipped.
#[cfg(feature = "otlp")]
fn parse_headers(raw: &str) -> anyhow::Result<MetadataMap> {
    use anyhow::{Context, bail};

    let mut map = MetadataMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid `OTLP_HEADERS` entry (expected key=value): {pair}");
        };
        let key = AsciiMetadataKey::from_bytes(key.trim().as_bytes())
            .with_context(|| format!("invalid header name: {key}"))?;
        let value = value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for header {}", key.as_str()))?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
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
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = OtlpSettings::from_env()?;
        let mut exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_metadata(settings.metadata.clone())
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint.clone())
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta);
        if let Some(tls) = settings.tls() {
            exporter = exporter.with_tls_config(tls);
        }
        let exporter = exporter
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

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

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = OtlpSettings::from_env()?;
        let mut exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_metadata(settings.metadata.clone())
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint.clone())
            .with_protocol(Protocol::Grpc);
        if let Some(tls) = settings.tls() {
            exporter = exporter.with_tls_config(tls);
        }
        let exporter = exporter.build().context("failed to build tracer exporter")?;

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

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static CALLS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PARTIAL_RESULTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TIMEOUTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STREAM_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = CALLS.set(
        meter
            .u64_counter("calls")
            .with_description("Bridged calls started")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("Time a caller spent blocked on a call")
            .build(),
    );

    let _ = PARTIAL_RESULTS.set(
        meter
            .u64_counter("partial_results")
            .with_description("Calls that returned before a clean completion")
            .build(),
    );

    let _ = TIMEOUTS.set(
        meter
            .u64_counter("timeouts")
            .with_description("Calls whose deadline elapsed")
            .build(),
    );

    let _ = STREAM_ERRORS.set(
        meter
            .u64_counter("stream_errors")
            .with_description("Calls that ended with a transport error")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn shape_attr(shape: CallShape) -> [KeyValue; 1] {
    [KeyValue::new("shape", shape.as_str())]
}

#[cfg(feature = "metrics")]
pub fn increment_calls(shape: CallShape) {
    if let Some(counter) = CALLS.get() {
        counter.add(1, &shape_attr(shape));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_calls(_shape: CallShape) {}

#[cfg(feature = "metrics")]
pub fn record_call_duration(shape: CallShape, duration_ms: f64) {
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration_ms, &shape_attr(shape));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_call_duration(_shape: CallShape, _duration_ms: f64) {}

/// Counts partial results, timeouts and stream errors for `outcome`.
#[cfg(feature = "metrics")]
pub fn record_outcome(shape: CallShape, outcome: &CallOutcome) {
    let attrs = shape_attr(shape);
    let add = |handle: &OnceLock<Counter<u64>>| {
        if let Some(counter) = handle.get() {
            counter.add(1, &attrs);
        }
    };

    match outcome {
        CallOutcome::Success { completion, .. } | CallOutcome::Empty { completion } => {
            match completion {
                Completion::Completed => {}
                Completion::Errored(_) => {
                    add(&PARTIAL_RESULTS);
                    add(&STREAM_ERRORS);
                }
                Completion::TimedOut => {
                    add(&PARTIAL_RESULTS);
                    add(&TIMEOUTS);
                }
            }
        }
        CallOutcome::Failure(_) => add(&STREAM_ERRORS),
        CallOutcome::TimedOut { .. } => add(&TIMEOUTS),
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_outcome(_shape: CallShape, _outcome: &CallOutcome) {}
