// SPDX-License-Identifier: MIT
//! Construction of the OTLP exporters, SDK providers, resource and propagators.
//!
//! All three signals share one [`Resource`] and one collector endpoint. With the
//! `grpc` transport the endpoint is used as-is; with `http/protobuf` the per-signal
//! path (`/v1/traces`, `/v1/metrics`, `/v1/logs`) is appended.
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, SpanExporter, WithExportConfig,
};
#[cfg(feature = "http")]
use opentelemetry_otlp::Protocol;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::config::{Config, OtlpProtocol};
use crate::error::{Result, TelemetryError};

/// The three SDK providers owned by a [`crate::Telemetry`].
///
/// Build them with [`TelemetryProviders::from_config`], or by hand (for example
/// around in-memory exporters) and pass them to [`crate::Telemetry::with_providers`].
pub struct TelemetryProviders {
    pub logger: SdkLoggerProvider,
    pub meter: SdkMeterProvider,
    pub tracer: SdkTracerProvider,
}

impl TelemetryProviders {
    /// Build batch log, periodic metric and batch trace pipelines exporting over OTLP.
    ///
    /// # Errors
    /// Returns [`TelemetryError::Exporter`] when an exporter cannot be built (e.g. an
    /// unparseable endpoint) and [`TelemetryError::TransportUnavailable`] when the
    /// configured protocol was compiled out.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let resource = build_resource(cfg);

        let logger = SdkLoggerProvider::builder()
            .with_batch_exporter(log_exporter(cfg)?)
            .with_resource(resource.clone())
            .build();

        let meter = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(metric_exporter(cfg)?).build())
            .with_resource(resource.clone())
            .build();

        let tracer = SdkTracerProvider::builder()
            .with_batch_exporter(span_exporter(cfg)?)
            .with_resource(resource)
            .build();

        Ok(Self {
            logger,
            meter,
            tracer,
        })
    }
}

/// Resource shared by every signal: configured extra attributes, then service
/// name, version and host name (which win over any extra attribute of the same key).
/// `host.name` is omitted when the host name cannot be resolved.
pub fn build_resource(cfg: &Config) -> Resource {
    resource_for_host(cfg, hostname())
}

fn resource_for_host(cfg: &Config, host: Option<String>) -> Resource {
    let extra = cfg
        .resource_attribute_pairs()
        .into_iter()
        .map(|(key, value)| KeyValue::new(key, value));

    Resource::builder()
        .with_attributes(extra)
        .with_service_name(cfg.service_name.clone())
        .with_attribute(KeyValue::new("service.version", cfg.service_version.clone()))
        .with_attributes(host.map(|host| KeyValue::new("host.name", host)))
        .build()
}

/// Composite propagator for a comma separated `OTEL_PROPAGATORS` value.
///
/// Returns the propagator and the names that were not recognized.
pub fn build_propagator(names: &str) -> (TextMapCompositePropagator, Vec<String>) {
    let mut propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = Vec::new();
    let mut unknown = Vec::new();

    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match name {
            "tracecontext" => propagators.push(Box::new(TraceContextPropagator::new())),
            "baggage" => propagators.push(Box::new(BaggagePropagator::new())),
            "none" => {}
            other => unknown.push(other.to_string()),
        }
    }
    (TextMapCompositePropagator::new(propagators), unknown)
}

/// Collector base URL; a bare `host:port` gets an `http://` scheme.
pub(crate) fn collector_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

// `HOSTNAME`, then the kernel's host name, then `/etc/hostname`.
fn hostname() -> Option<String> {
    let non_empty = |h: String| Some(h.trim().to_string()).filter(|h| !h.is_empty());
    std::env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .or_else(|| {
            ["/proc/sys/kernel/hostname", "/etc/hostname"]
                .iter()
                .find_map(|path| std::fs::read_to_string(path).ok().and_then(non_empty))
        })
}

type BuildResult<T> = std::result::Result<T, ExporterBuildError>;

fn exporter_error(signal: &'static str) -> impl FnOnce(ExporterBuildError) -> TelemetryError {
    move |source| TelemetryError::Exporter { signal, source }
}

#[allow(unreachable_patterns)]
fn span_exporter(cfg: &Config) -> Result<SpanExporter> {
    let built: BuildResult<SpanExporter> = match cfg.protocol {
        #[cfg(feature = "grpc")]
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(collector_url(&cfg.otlp_endpoint))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        #[cfg(feature = "http")]
        OtlpProtocol::HttpProtobuf => SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}/v1/traces", collector_url(&cfg.otlp_endpoint)))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        other => return Err(TelemetryError::TransportUnavailable(other.as_str())),
    };
    built.map_err(exporter_error("trace"))
}

#[allow(unreachable_patterns)]
fn metric_exporter(cfg: &Config) -> Result<MetricExporter> {
    let built: BuildResult<MetricExporter> = match cfg.protocol {
        #[cfg(feature = "grpc")]
        OtlpProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(collector_url(&cfg.otlp_endpoint))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        #[cfg(feature = "http")]
        OtlpProtocol::HttpProtobuf => MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}/v1/metrics", collector_url(&cfg.otlp_endpoint)))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        other => return Err(TelemetryError::TransportUnavailable(other.as_str())),
    };
    built.map_err(exporter_error("metric"))
}

#[allow(unreachable_patterns)]
fn log_exporter(cfg: &Config) -> Result<LogExporter> {
    let built: BuildResult<LogExporter> = match cfg.protocol {
        #[cfg(feature = "grpc")]
        OtlpProtocol::Grpc => LogExporter::builder()
            .with_tonic()
            .with_endpoint(collector_url(&cfg.otlp_endpoint))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        #[cfg(feature = "http")]
        OtlpProtocol::HttpProtobuf => LogExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}/v1/logs", collector_url(&cfg.otlp_endpoint)))
            .with_timeout(cfg.exporter_timeout)
            .build(),
        other => return Err(TelemetryError::TransportUnavailable(other.as_str())),
    };
    built.map_err(exporter_error("log"))
}
