// SPDX-License-Identifier: MIT
//! Environment-sourced telemetry settings.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OTEL_SERVICE_NAME` | `caio` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `localhost:4317` |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `grpc` |
//! | `OTEL_EXPORTER_OTLP_TIMEOUT` | `10s` |
//! | `OTEL_RESOURCE_ATTRIBUTES` | - |
//! | `OTEL_LOG_LEVEL` | `info` |
//! | `OTEL_PROPAGATORS` | `tracecontext,baggage` |
//! | `SERVICE_VERSION` | `0.0.1` |
//! | `TELEMETRY_ENABLED` | `true` |
//! | `LOKI_*` | see [`Config`] |
//!
//! Empty values are treated as unset.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ::config::{Environment, Map};
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Variables read by [`Config::from_lookup`].
const KEYS: &[&str] = &[
    "OTEL_SERVICE_NAME",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "OTEL_EXPORTER_OTLP_PROTOCOL",
    "OTEL_EXPORTER_OTLP_TIMEOUT",
    "OTEL_RESOURCE_ATTRIBUTES",
    "OTEL_LOG_LEVEL",
    "OTEL_PROPAGATORS",
    "SERVICE_VERSION",
    "TELEMETRY_ENABLED",
    "LOKI_APP_NAME",
    "LOKI_AUTH_TOKEN",
    "LOKI_FLUSH_TIMEOUT",
    "LOKI_TENANT_ID",
    "LOKI_URL",
];

/// Transport used by the OTLP exporters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum OtlpProtocol {
    /// OTLP/gRPC through tonic (collector port 4317).
    #[default]
    Grpc,
    /// OTLP/HTTP with binary protobuf bodies (collector port 4318).
    HttpProtobuf,
}

impl FromStr for OtlpProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "grpc" => Ok(Self::Grpc),
            "http/protobuf" => Ok(Self::HttpProtobuf),
            other => Err(format!("unsupported protocol {other:?}")),
        }
    }
}

impl TryFrom<String> for OtlpProtocol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl OtlpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::HttpProtobuf => "http/protobuf",
        }
    }
}

impl fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry configuration. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `service.name` resource attribute; also names the tracer and meter scopes.
    #[serde(rename = "otel_service_name")]
    pub service_name: String,
    /// Collector address. A bare `host:port` is accepted.
    #[serde(rename = "otel_exporter_otlp_endpoint")]
    pub otlp_endpoint: String,
    /// Extra resource attributes as `key=value` pairs separated by commas.
    #[serde(rename = "otel_resource_attributes")]
    pub resource_attributes: String,
    pub service_version: String,
    /// When false, [`crate::init`] hands out a [`crate::NoopTelemetry`].
    #[serde(rename = "telemetry_enabled")]
    pub enabled: bool,
    #[serde(
        rename = "otel_exporter_otlp_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub exporter_timeout: Duration,
    /// Base filter directive for every log layer when `RUST_LOG` is unset.
    #[serde(rename = "otel_log_level")]
    pub log_level: String,
    /// Comma separated propagator names (`tracecontext`, `baggage`, `none`).
    #[serde(rename = "otel_propagators")]
    pub propagators: String,
    #[serde(rename = "otel_exporter_otlp_protocol")]
    pub protocol: OtlpProtocol,
    // Log shipping settings. Carried for callers; the providers here do not read them.
    pub loki_app_name: String,
    pub loki_auth_token: Option<String>,
    /// Milliseconds.
    pub loki_flush_timeout: u64,
    pub loki_tenant_id: String,
    pub loki_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "caio".to_string(),
            otlp_endpoint: "localhost:4317".to_string(),
            resource_attributes: String::new(),
            service_version: "0.0.1".to_string(),
            enabled: true,
            exporter_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
            propagators: "tracecontext,baggage".to_string(),
            protocol: OtlpProtocol::Grpc,
            loki_app_name: "go-app".to_string(),
            loki_auth_token: None,
            loki_flush_timeout: 2000,
            loki_tenant_id: "my-tenant".to_string(),
            loki_url: None,
        }
    }
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through `lookup`, which maps a variable name to its value.
    ///
    /// ```
    /// use service_telemetry::Config;
    /// let cfg = Config::from_lookup(|key| match key {
    ///     "OTEL_SERVICE_NAME" => Some("checkout".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(cfg.service_name, "checkout");
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = Map::new();
        for key in KEYS {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                vars.insert(key.to_string(), value);
            }
        }

        let cfg: Self = ::config::Config::builder()
            .add_source(Environment::default().source(Some(vars)))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Parsed `OTEL_RESOURCE_ATTRIBUTES` pairs. Entries without `=` or with an empty key are skipped.
    pub fn resource_attribute_pairs(&self) -> Vec<(String, String)> {
        self.resource_attributes
            .split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

// Bare integers are milliseconds, as OTLP timeouts are specified.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let value = raw.trim();
    if let Ok(millis) = value.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(value)
        .map_err(|e| serde::de::Error::custom(format!("invalid duration {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = load(&[]).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.service_name, "caio");
        assert_eq!(cfg.otlp_endpoint, "localhost:4317");
        assert_eq!(cfg.service_version, "0.0.1");
        assert!(cfg.enabled);
        assert_eq!(cfg.exporter_timeout, Duration::from_secs(10));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.propagators, "tracecontext,baggage");
        assert_eq!(cfg.protocol, OtlpProtocol::Grpc);
        assert_eq!(cfg.loki_app_name, "go-app");
        assert_eq!(cfg.loki_flush_timeout, 2000);
        assert_eq!(cfg.loki_tenant_id, "my-tenant");
        assert!(cfg.loki_auth_token.is_none());
        assert!(cfg.loki_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("OTEL_SERVICE_NAME", "billing"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_EXPORTER_OTLP_TIMEOUT", "1m 30s"),
            ("TELEMETRY_ENABLED", "False"),
            ("SERVICE_VERSION", "2.1.0"),
            ("LOKI_URL", "http://loki:3100"),
            ("LOKI_FLUSH_TIMEOUT", "500"),
        ])
        .expect("load");
        assert_eq!(cfg.service_name, "billing");
        assert_eq!(cfg.otlp_endpoint, "http://collector:4318");
        assert_eq!(cfg.protocol, OtlpProtocol::HttpProtobuf);
        assert_eq!(cfg.exporter_timeout, Duration::from_secs(90));
        assert!(!cfg.enabled);
        assert_eq!(cfg.service_version, "2.1.0");
        assert_eq!(cfg.loki_url.as_deref(), Some("http://loki:3100"));
        assert_eq!(cfg.loki_flush_timeout, 500);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let cfg = load(&[("OTEL_SERVICE_NAME", ""), ("TELEMETRY_ENABLED", "  ")]).expect("load");
        assert_eq!(cfg.service_name, "caio");
        assert!(cfg.enabled);
    }

    #[test]
    fn bare_integer_timeout_is_milliseconds() {
        let cfg = load(&[("OTEL_EXPORTER_OTLP_TIMEOUT", "2500")]).expect("load");
        assert_eq!(cfg.exporter_timeout, Duration::from_millis(2500));
        let cfg = load(&[("OTEL_EXPORTER_OTLP_TIMEOUT", "500ms")]).expect("load");
        assert_eq!(cfg.exporter_timeout, Duration::from_millis(500));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = load(&[("TELEMETRY_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));

        let err = load(&[("OTEL_EXPORTER_OTLP_TIMEOUT", "soon")]).unwrap_err();
        assert!(err.to_string().contains("soon"));

        let err = load(&[("OTEL_EXPORTER_OTLP_PROTOCOL", "http/json")]).unwrap_err();
        assert!(err.to_string().contains("http/json"));

        assert!(load(&[("LOKI_FLUSH_TIMEOUT", "often")]).is_err());
    }

    #[test]
    fn boolean_spellings_follow_the_config_loader() {
        for (raw, expected) in [("1", true), ("on", true), ("0", false), ("FALSE", false)] {
            let cfg = load(&[("TELEMETRY_ENABLED", raw)]).expect("load");
            assert_eq!(cfg.enabled, expected, "TELEMETRY_ENABLED={raw}");
        }
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let cfg = Config::from_lookup(|key| match key {
            "OTEL_LOG_LEVEL" => Some("debug".into()),
            "PATH" | "HOME" => Some("/should/not/matter".into()),
            _ => None,
        })
        .expect("load");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.service_name, "caio");
    }

    #[test]
    fn resource_attribute_pairs_skip_malformed_entries() {
        let cfg = Config {
            resource_attributes: "deployment.environment=prod, team = payments,broken,=x".into(),
            ..Config::default()
        };
        assert_eq!(
            cfg.resource_attribute_pairs(),
            vec![
                ("deployment.environment".to_string(), "prod".to_string()),
                ("team".to_string(), "payments".to_string()),
            ]
        );
        assert!(Config::default().resource_attribute_pairs().is_empty());
    }
}
