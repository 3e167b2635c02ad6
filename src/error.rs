// SPDX-License-Identifier: MIT
//! Error types returned by configuration loading and provider construction.
use thiserror::Error;

/// Failure while reading [`crate::config::Config`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
}

/// Errors surfaced by the telemetry layer.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to load telemetry config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create OTLP {signal} exporter: {source}")]
    Exporter {
        signal: &'static str,
        #[source]
        source: opentelemetry_otlp::ExporterBuildError,
    },

    #[error("OTLP transport {0} is not compiled in (enable the matching cargo feature)")]
    TransportUnavailable(&'static str),

    #[error("invalid instrument {name:?}: {reason}")]
    InvalidInstrument { name: String, reason: &'static str },

    #[error("telemetry shutdown failed: {0}")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
