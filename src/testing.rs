// SPDX-License-Identifier: MIT
//! Meter pipelines backed by an in-memory exporter, for unit tests.
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

/// A meter provider whose periodic reader exports into the returned exporter.
pub(crate) fn metered() -> (SdkMeterProvider, InMemoryMetricExporter) {
    let exporter = InMemoryMetricExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter.clone()).build())
        .build();
    (provider, exporter)
}

/// One exported data point of a `u64` histogram or an `i64` sum.
#[derive(Debug)]
pub(crate) struct Point {
    pub attributes: Vec<KeyValue>,
    /// Histogram sample count; zero for sums.
    pub count: u64,
    /// Histogram sum or the sum value.
    pub value: i64,
}

impl Point {
    pub fn attribute(&self, key: &str) -> Option<opentelemetry::Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }
}

/// Flush `provider` and return the data points of metric `name` from the latest export.
pub(crate) fn points(provider: &SdkMeterProvider, exporter: &InMemoryMetricExporter, name: &str) -> Vec<Point> {
    provider.force_flush().expect("flush meter provider");
    let exported = exporter.get_finished_metrics().expect("finished metrics");
    let Some(latest) = exported.last() else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for scope in latest.scope_metrics() {
        for metric in scope.metrics().filter(|m| m.name() == name) {
            match metric.data() {
                AggregatedMetrics::U64(MetricData::Histogram(histogram)) => {
                    found.extend(histogram.data_points().map(|p| Point {
                        attributes: p.attributes().cloned().collect(),
                        count: p.count() as u64,
                        value: p.sum() as i64,
                    }))
                }
                AggregatedMetrics::I64(MetricData::Sum(sum)) => {
                    found.extend(sum.data_points().map(|p| Point {
                        attributes: p.attributes().cloned().collect(),
                        count: 0,
                        value: p.value(),
                    }))
                }
                _ => {}
            }
        }
    }
    found
}

/// Current value of the `i64` sum `name`, or `None` if nothing was exported for it.
pub(crate) fn sum_value(provider: &SdkMeterProvider, exporter: &InMemoryMetricExporter, name: &str) -> Option<i64> {
    let points = points(provider, exporter, name);
    (!points.is_empty()).then(|| points.iter().map(|p| p.value).sum())
}
