// SPDX-License-Identifier: MIT
//! The capability interface shared by [`crate::Telemetry`] and [`crate::NoopTelemetry`].
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Histogram, UpDownCounter};
use opentelemetry::Context;

use crate::error::Result;
use crate::metric::Metric;

/// Shared handle passed to middleware and request handlers.
pub type SharedTelemetry = Arc<dyn TelemetryProvider>;

/// One completed HTTP request, as handed to [`TelemetryProvider::log_request`].
#[derive(Clone, Debug)]
pub struct RequestLog {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency: Duration,
    pub client_ip: String,
}

/// Logging, metrics and tracing operations available to a service.
pub trait TelemetryProvider: Send + Sync + 'static {
    fn service_name(&self) -> &str;

    fn log_info(&self, message: &str);

    fn log_error(&self, message: &str);

    /// Log at fatal severity and exit the process with status 1.
    fn log_fatal(&self, message: &str) -> !;

    /// Emit the access log record for a finished request.
    fn log_request(&self, entry: &RequestLog);

    fn histogram(&self, metric: &Metric) -> Result<Histogram<u64>>;

    fn up_down_counter(&self, metric: &Metric) -> Result<UpDownCounter<i64>>;

    /// Start a span named `name` as a child of `parent`.
    ///
    /// The returned context carries the new span; end it with
    /// `cx.span().end()` once the unit of work completes.
    fn start_span(&self, parent: &Context, name: &str) -> Context;

    /// Flush and shut down every provider. Called once, at process exit.
    fn shutdown(&self) -> Result<()>;
}
