// SPDX-License-Identifier: MIT
//! The OpenTelemetry-backed [`TelemetryProvider`].
//!
//! [`Telemetry::new`] wires three OTLP pipelines (logs, metrics, traces) that share
//! one resource, installs the tracer/meter providers and the text-map propagator
//! globally, and builds a `tracing` dispatch that acts as the structured logger:
//!
//! * a JSON layer writing to stdout (filtered by `RUST_LOG`, else `OTEL_LOG_LEVEL`);
//! * an OpenTelemetry log bridge feeding the log provider;
//! * an OpenTelemetry span layer so `#[instrument]` spans are exported.
//!
//! # Example
//! ```no_run
//! use service_telemetry::{Config, Telemetry, TelemetryProvider};
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let telemetry = Telemetry::new(Config::from_env()?)?;
//!     telemetry.log_info("service starting");
//!     // ... serve requests ...
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Threading Model
//! Batch processors and the periodic metric reader run on SDK-owned threads. The gRPC
//! exporters spawn their connection tasks on the Tokio runtime, so construct
//! telemetry from inside one.
use opentelemetry::metrics::{Histogram, Meter, MeterProvider as _, UpDownCounter};
use opentelemetry::trace::{TraceContextExt as _, Tracer as _, TracerProvider as _};
use opentelemetry::{global, Context, InstrumentationScope};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing::Dispatch;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::Config;
use crate::error::{Result, TelemetryError};
use crate::metric::Metric;
use crate::provider::{RequestLog, TelemetryProvider};
use crate::providers::{build_propagator, TelemetryProviders};

// Targets whose events would loop back into the exporters they come from.
const EXPORT_PIPELINE_TARGETS: &[&str] =
    &["hyper", "h2", "tonic", "tower", "reqwest", "opentelemetry"];

/// Owns the SDK providers, the meter/tracer scoped to the service and the logger.
pub struct Telemetry {
    logger_provider: SdkLoggerProvider,
    meter_provider: SdkMeterProvider,
    tracer_provider: SdkTracerProvider,
    dispatch: Dispatch,
    meter: Meter,
    tracer: SdkTracer,
    cfg: Config,
}

impl Telemetry {
    /// Build OTLP exporters and providers from `cfg` and install them globally.
    ///
    /// # Errors
    /// Returns [`TelemetryError::Exporter`] if any exporter fails to build. Nothing is
    /// installed globally in that case.
    pub fn new(cfg: Config) -> Result<Self> {
        let providers = TelemetryProviders::from_config(&cfg)?;

        global::set_tracer_provider(providers.tracer.clone());
        global::set_meter_provider(providers.meter.clone());
        let (propagator, unknown_propagators) = build_propagator(&cfg.propagators);
        global::set_text_map_propagator(propagator);

        let telemetry = Self::with_providers(cfg, providers);
        let installed = tracing::dispatcher::set_global_default(telemetry.dispatch.clone()).is_ok();

        telemetry.in_scope(|| {
            if !installed {
                tracing::debug!("global subscriber already set; logging through the instance dispatch only");
            }
            for name in &unknown_propagators {
                tracing::warn!(propagator = %name, "ignoring unknown propagator");
            }
        });
        Ok(telemetry)
    }

    /// Wrap providers built elsewhere. Nothing is installed globally.
    pub fn with_providers(cfg: Config, providers: TelemetryProviders) -> Self {
        let TelemetryProviders {
            logger,
            meter,
            tracer,
        } = providers;

        let scope = InstrumentationScope::builder(cfg.service_name.clone())
            .with_version(cfg.service_version.clone())
            .build();
        let sdk_tracer = tracer.tracer_with_scope(scope.clone());
        let sdk_meter = meter.meter_with_scope(scope);
        let dispatch = build_dispatch(&cfg, &logger, sdk_tracer.clone());

        Self {
            logger_provider: logger,
            meter_provider: meter,
            tracer_provider: tracer,
            dispatch,
            meter: sdk_meter,
            tracer: sdk_tracer,
            cfg,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

// `RUST_LOG` when set, else the configured level. Every layer starts from it.
fn base_directive(rust_log: Option<String>, cfg: &Config) -> String {
    rust_log
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| cfg.log_level.clone())
}

fn bridge_directive(base: &str) -> String {
    let mut directive = base.to_string();
    for target in EXPORT_PIPELINE_TARGETS {
        directive.push_str(&format!(",{target}=off"));
    }
    directive
}

fn build_dispatch(cfg: &Config, logger_provider: &SdkLoggerProvider, tracer: SdkTracer) -> Dispatch {
    let base = base_directive(std::env::var(EnvFilter::DEFAULT_ENV).ok(), cfg);

    let stdout_layer = fmt::layer()
        .json()
        .with_writer(std::io::stdout)
        .with_filter(EnvFilter::new(&base));

    let bridge_layer =
        OpenTelemetryTracingBridge::new(logger_provider).with_filter(EnvFilter::new(bridge_directive(&base)));

    let span_layer = OpenTelemetryLayer::new(tracer).with_filter(EnvFilter::new(&base));

    Dispatch::new(
        Registry::default()
            .with(stdout_layer)
            .with(bridge_layer)
            .with(span_layer),
    )
}

impl TelemetryProvider for Telemetry {
    fn service_name(&self) -> &str {
        &self.cfg.service_name
    }

    fn log_info(&self, message: &str) {
        self.in_scope(|| tracing::info!("{message}"));
    }

    fn log_error(&self, message: &str) {
        self.in_scope(|| tracing::error!("{message}"));
    }

    fn log_fatal(&self, message: &str) -> ! {
        self.in_scope(|| tracing::error!(fatal = true, "{message}"));
        if let Err(e) = self.logger_provider.force_flush() {
            eprintln!("Failed to flush logger provider: {e}");
        }
        std::process::exit(1)
    }

    fn log_request(&self, entry: &RequestLog) {
        self.in_scope(|| {
            tracing::info!(
                http.method = %entry.method,
                http.path = %entry.path,
                http.status_code = entry.status,
                http.client_ip = %entry.client_ip,
                latency_ms = entry.latency.as_millis() as u64,
                "request completed"
            )
        });
    }

    fn histogram(&self, metric: &Metric) -> Result<Histogram<u64>> {
        metric.ensure_valid()?;
        Ok(self
            .meter
            .u64_histogram(metric.name.clone())
            .with_description(metric.description.clone())
            .with_unit(metric.unit.clone())
            .build())
    }

    fn up_down_counter(&self, metric: &Metric) -> Result<UpDownCounter<i64>> {
        metric.ensure_valid()?;
        Ok(self
            .meter
            .i64_up_down_counter(metric.name.clone())
            .with_description(metric.description.clone())
            .with_unit(metric.unit.clone())
            .build())
    }

    fn start_span(&self, parent: &Context, name: &str) -> Context {
        let span = self.tracer.start_with_context(name.to_string(), parent);
        parent.with_span(span)
    }

    /// Shutdown order is logs, metrics, traces. Every provider is attempted; failures
    /// are joined into one [`TelemetryError::Shutdown`].
    fn shutdown(&self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(e) = self.logger_provider.shutdown() {
            errs.push(format!("logger: {e}"));
        }
        if let Err(e) = self.meter_provider.shutdown() {
            errs.push(format!("meter: {e}"));
        }
        if let Err(e) = self.tracer_provider.shutdown() {
            errs.push(format!("tracer: {e}"));
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(errs.join(", ")))
        }
    }
}
