// SPDX-License-Identifier: MIT
//! [`TelemetryProvider`] for environments with telemetry disabled.
use opentelemetry::metrics::{Histogram, Meter, MeterProvider as _, UpDownCounter};
use opentelemetry::Context;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use crate::config::Config;
use crate::error::Result;
use crate::metric::Metric;
use crate::provider::{RequestLog, TelemetryProvider};

/// Discards logs, metrics and spans.
///
/// Instruments come from a meter provider without readers, so recording into them
/// is accepted and never exported. `log_fatal` still terminates the process.
pub struct NoopTelemetry {
    service_name: String,
    // Owns the pipeline behind `meter`.
    _meter_provider: SdkMeterProvider,
    meter: Meter,
}

impl NoopTelemetry {
    pub fn new(cfg: &Config) -> Self {
        let meter_provider = SdkMeterProvider::builder().build();
        let meter = meter_provider.meter("noop");
        Self {
            service_name: cfg.service_name.clone(),
            _meter_provider: meter_provider,
            meter,
        }
    }
}

impl TelemetryProvider for NoopTelemetry {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn log_info(&self, _message: &str) {}

    fn log_error(&self, _message: &str) {}

    fn log_fatal(&self, _message: &str) -> ! {
        std::process::exit(1)
    }

    fn log_request(&self, _entry: &RequestLog) {}

    fn histogram(&self, metric: &Metric) -> Result<Histogram<u64>> {
        metric.ensure_valid()?;
        Ok(self.meter.u64_histogram(metric.name.clone()).build())
    }

    fn up_down_counter(&self, metric: &Metric) -> Result<UpDownCounter<i64>> {
        metric.ensure_valid()?;
        Ok(self.meter.i64_up_down_counter(metric.name.clone()).build())
    }

    fn start_span(&self, parent: &Context, _name: &str) -> Context {
        parent.clone()
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{REQUESTS_IN_FLIGHT, REQUEST_DURATION_MILLIS};
    use crate::testing::{metered, points};
    use opentelemetry::trace::TraceContextExt as _;

    #[test]
    fn keeps_service_name() {
        let noop = NoopTelemetry::new(&Config {
            service_name: "quiet".into(),
            ..Config::default()
        });
        assert_eq!(noop.service_name(), "quiet");
    }

    #[test]
    fn start_span_returns_parent_context() {
        let noop = NoopTelemetry::new(&Config::default());
        let cx = noop.start_span(&Context::new(), "ignored");
        assert!(!cx.has_active_span());
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn instruments_accept_measurements_silently() {
        let noop = NoopTelemetry::new(&Config::default());
        noop.histogram(&REQUEST_DURATION_MILLIS)
            .expect("histogram")
            .record(5, &[]);
        let counter = noop.up_down_counter(&REQUESTS_IN_FLIGHT).expect("counter");
        counter.add(1, &[]);
        counter.add(-1, &[]);
        noop.log_info("dropped");
        noop.log_error("dropped");
    }

    #[test]
    fn measurements_do_not_reach_the_global_pipeline() {
        let (provider, exporter) = metered();
        opentelemetry::global::set_meter_provider(provider.clone());

        let noop = NoopTelemetry::new(&Config::default());
        noop.histogram(&REQUEST_DURATION_MILLIS)
            .expect("histogram")
            .record(5, &[]);
        drop(crate::http::record_metrics(&noop));

        assert!(points(&provider, &exporter, "request_duration_millis").is_empty());
        assert!(points(&provider, &exporter, "requests_inflight").is_empty());
    }

    #[test]
    fn shutdown_is_repeatable() {
        let noop = NoopTelemetry::new(&Config::default());
        noop.shutdown().expect("shutdown");
        noop.shutdown().expect("second shutdown");
    }
}
