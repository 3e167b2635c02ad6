// SPDX-License-Identifier: MIT
//! OpenTelemetry logging, metrics and tracing for HTTP services.
//!
//! The crate exposes one capability interface, [`TelemetryProvider`], with two
//! implementations:
//! * [`Telemetry`] – OTLP log/metric/trace providers, a JSON stdout logger bridged to
//!   OpenTelemetry, and a service-scoped meter and tracer.
//! * [`NoopTelemetry`] – accepts every call and records nothing, for environments
//!   with `TELEMETRY_ENABLED=false`.
//!
//! Request instrumentation for axum lives in [`http`]: [`start_tracing`],
//! [`record_metrics`] and middleware applied with [`RouterExt::with_telemetry`].
//!
//! # Feature Flags
//! * `grpc` (default) – OTLP over gRPC via tonic.
//! * `http` (default) – OTLP over HTTP with binary protobuf.
//!
//! # Quick Start
//! ```no_run
//! use service_telemetry::TelemetryProvider;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let telemetry = service_telemetry::init()?;
//!     telemetry.log_info("application started");
//!     // business logic
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod error;
pub mod http;
pub mod metric;
pub mod noop;
pub mod provider;
pub mod providers;
pub mod telemetry;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use config::{Config, OtlpProtocol};
pub use error::{ConfigError, Result, TelemetryError};
pub use http::{record_metrics, start_tracing, RequestMetrics, RouterExt};
pub use metric::{Metric, REQUESTS_IN_FLIGHT, REQUEST_DURATION_MILLIS};
pub use noop::NoopTelemetry;
pub use provider::{RequestLog, SharedTelemetry, TelemetryProvider};
pub use providers::TelemetryProviders;
pub use telemetry::Telemetry;

/// Load [`Config`] from the environment and build the matching provider.
///
/// Returns a [`Telemetry`] when `TELEMETRY_ENABLED` is true, otherwise a
/// [`NoopTelemetry`]. Must run inside a Tokio runtime when the gRPC transport is used.
///
/// # Errors
/// Config parse failures and exporter construction failures are wrapped in
/// [`TelemetryError`].
pub fn init() -> Result<SharedTelemetry> {
    let cfg = Config::from_env()?;
    from_config(cfg)
}

/// Same as [`init`] with an already loaded configuration.
pub fn from_config(cfg: Config) -> Result<SharedTelemetry> {
    let telemetry: SharedTelemetry = if cfg.enabled {
        Arc::new(Telemetry::new(cfg)?)
    } else {
        Arc::new(NoopTelemetry::new(&cfg))
    };
    telemetry.log_info("telemetry initialized");
    Ok(telemetry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn telemetry_init_works() {
        let cfg = Config {
            exporter_timeout: std::time::Duration::from_millis(100),
            ..Config::default()
        };
        let telemetry = from_config(cfg).expect("telemetry init");
        assert_eq!(telemetry.service_name(), "caio");
        let _ = telemetry.shutdown();
    }

    #[test]
    fn disabled_config_yields_noop() {
        let telemetry = from_config(Config {
            enabled: false,
            service_name: "offline".into(),
            ..Config::default()
        })
        .expect("noop init");
        assert_eq!(telemetry.service_name(), "offline");
        telemetry.shutdown().expect("noop shutdown");
    }
}
