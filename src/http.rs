// SPDX-License-Identifier: MIT
//! Request instrumentation for axum services.
//!
//! [`start_tracing`] and [`record_metrics`] can be called directly from a handler.
//! The middleware functions below wrap them for use with
//! [`axum::middleware::from_fn_with_state`]; [`RouterExt::with_telemetry`] applies
//! all of them at once:
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use service_telemetry::{Config, NoopTelemetry, RouterExt, SharedTelemetry};
//!
//! let telemetry: SharedTelemetry = Arc::new(NoopTelemetry::new(&Config::default()));
//! let app: Router = Router::new()
//!     .route("/health", get(|| async { "ok" }))
//!     .with_telemetry(telemetry);
//! ```
//!
//! Every call goes through [`TelemetryProvider`], so with a [`crate::NoopTelemetry`]
//! the middleware forwards requests without recording anything.
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use opentelemetry::context::FutureExt as _;
use opentelemetry::metrics::{Histogram, UpDownCounter};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::{Status, TraceContextExt as _};
use opentelemetry::{global, Context, KeyValue};

use crate::metric::{REQUESTS_IN_FLIGHT, REQUEST_DURATION_MILLIS};
use crate::provider::{RequestLog, SharedTelemetry, TelemetryProvider};

/// Start the server span for `request` and attach its HTTP attributes.
///
/// The span is named `"{METHOD} {path}"`. A remote parent carried in the request
/// headers (per the global text-map propagator) takes precedence over `parent`.
/// The caller ends the span through the returned context.
pub fn start_tracing<B>(parent: &Context, tp: &dyn TelemetryProvider, request: &axum::http::Request<B>) -> Context {
    let parent = global::get_text_map_propagator(|propagator| {
        propagator.extract_with_context(parent, &HeaderExtractor(request.headers()))
    });

    let method = request.method().as_str();
    let path = request.uri().path();
    let cx = tp.start_span(&parent, &format!("{method} {path}"));

    cx.span().set_attributes([
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.path", path.to_string()),
        KeyValue::new("http.source_ip", source_ip(request)),
        KeyValue::new("http.user_agent", user_agent(request.headers())),
    ]);
    cx
}

/// Start measuring one request: the in-flight counter is incremented now and
/// decremented, with the elapsed milliseconds recorded in the duration histogram,
/// when the returned guard is finished or dropped.
///
/// Instrument creation failures are reported through
/// [`TelemetryProvider::log_error`]; the remaining instrument still records.
pub fn record_metrics(tp: &dyn TelemetryProvider) -> RequestMetrics {
    let in_flight = match tp.up_down_counter(&REQUESTS_IN_FLIGHT) {
        Ok(counter) => Some(InFlight::enter(counter)),
        Err(e) => {
            tp.log_error(&format!("Failed to create in-flight counter: {e}"));
            None
        }
    };
    let duration = match tp.histogram(&REQUEST_DURATION_MILLIS) {
        Ok(histogram) => Some(histogram),
        Err(e) => {
            tp.log_error(&format!("Failed to create duration histogram: {e}"));
            None
        }
    };

    RequestMetrics {
        in_flight,
        duration,
        start: Instant::now(),
    }
}

/// Guard returned by [`record_metrics`].
#[must_use = "request metrics are recorded when the guard is finished or dropped"]
pub struct RequestMetrics {
    in_flight: Option<InFlight>,
    duration: Option<Histogram<u64>>,
    start: Instant,
}

impl RequestMetrics {
    /// Record the duration with `attributes` and leave the in-flight count.
    pub fn finish(mut self, attributes: &[KeyValue]) {
        self.complete(attributes);
    }

    fn complete(&mut self, attributes: &[KeyValue]) {
        self.in_flight.take();
        if let Some(histogram) = self.duration.take() {
            histogram.record(self.start.elapsed().as_millis() as u64, attributes);
        }
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        self.complete(&[]);
    }
}

// +1 on creation, -1 on drop, so cancelled requests still leave the count.
struct InFlight(UpDownCounter<i64>);

impl InFlight {
    fn enter(counter: UpDownCounter<i64>) -> Self {
        counter.add(1, &[]);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.add(-1, &[]);
    }
}

/// Middleware: server span around the rest of the stack.
///
/// Records `http.status_code` and marks 5xx responses as errors.
pub async fn trace_request(State(tp): State<SharedTelemetry>, request: Request, next: Next) -> Response {
    let parent = Context::current();
    let cx = start_tracing(&parent, tp.as_ref(), &request);

    let response = next.run(request).with_context(cx.clone()).await;

    // A no-op provider hands back the parent; that span is not ours to end.
    if cx.span().span_context() != parent.span().span_context() {
        let span = cx.span();
        let status = response.status();
        span.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
        if status.is_server_error() {
            span.set_status(Status::error(status.to_string()));
        }
        span.end();
    }
    response
}

/// Middleware: one access log record per request.
pub async fn log_request(State(tp): State<SharedTelemetry>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_ip = source_ip(&request);

    let response = next.run(request).await;

    tp.log_request(&RequestLog {
        method,
        path,
        status: response.status().as_u16(),
        latency: start.elapsed(),
        client_ip,
    });
    response
}

/// Middleware: request latency histogram keyed by method, route and status.
pub async fn meter_request_duration(State(tp): State<SharedTelemetry>, request: Request, next: Next) -> Response {
    let histogram = match tp.histogram(&REQUEST_DURATION_MILLIS) {
        Ok(histogram) => Some(histogram),
        Err(e) => {
            tp.log_error(&format!("Failed to create duration histogram: {e}"));
            None
        }
    };
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(histogram) = histogram {
        histogram.record(
            start.elapsed().as_millis() as u64,
            &[
                KeyValue::new("http.method", method),
                KeyValue::new("http.route", route),
                KeyValue::new("http.status_code", i64::from(response.status().as_u16())),
            ],
        );
    }
    response
}

/// Middleware: in-flight request counter.
pub async fn meter_requests_in_flight(State(tp): State<SharedTelemetry>, request: Request, next: Next) -> Response {
    let _in_flight = match tp.up_down_counter(&REQUESTS_IN_FLIGHT) {
        Ok(counter) => Some(InFlight::enter(counter)),
        Err(e) => {
            tp.log_error(&format!("Failed to create in-flight counter: {e}"));
            None
        }
    };
    next.run(request).await
}

/// Attach the request telemetry middleware to a router.
pub trait RouterExt {
    /// Layers, outermost first: tracing, in-flight counter, duration histogram, access log.
    fn with_telemetry(self, tp: SharedTelemetry) -> Self;
}

impl<S> RouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_telemetry(self, tp: SharedTelemetry) -> Self {
        self.layer(from_fn_with_state(tp.clone(), log_request))
            .layer(from_fn_with_state(tp.clone(), meter_request_duration))
            .layer(from_fn_with_state(tp.clone(), meter_requests_in_flight))
            .layer(from_fn_with_state(tp, trace_request))
    }
}

/// Client address: first `X-Forwarded-For` hop, else the socket peer, else empty.
fn source_ip<B>(request: &axum::http::Request<B>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_default()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Reads propagation fields from HTTP request headers.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}
