// SPDX-License-Identifier: MIT
//! Metric descriptors materialized lazily against the SDK meter.
use std::borrow::Cow;

use crate::error::{Result, TelemetryError};

/// Name, description and unit of an instrument.
///
/// A descriptor is only a key: the instrument itself is created through
/// [`crate::TelemetryProvider::histogram`] or
/// [`crate::TelemetryProvider::up_down_counter`]. The SDK returns the same
/// underlying instrument for repeated requests with the same descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Metric {
    pub name: Cow<'static, str>,
    pub description: Cow<'static, str>,
    pub unit: Cow<'static, str>,
}

/// Latency of HTTP requests handled by the server, in milliseconds.
pub const REQUEST_DURATION_MILLIS: Metric = Metric::new(
    "request_duration_millis",
    "Measures the latency of HTTP requests processed by the server, in milliseconds.",
    "ms",
);

/// HTTP requests currently being processed by the server.
pub const REQUESTS_IN_FLIGHT: Metric = Metric::new(
    "requests_inflight",
    "Measures the number of requests currently being processed by the server.",
    "{count}",
);

const MAX_NAME_LEN: usize = 255;

impl Metric {
    pub const fn new(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            description: Cow::Borrowed(description),
            unit: Cow::Borrowed(unit),
        }
    }

    /// Check the name against the OpenTelemetry instrument name syntax.
    ///
    /// The SDK silently hands back a no-op instrument for invalid names; checking
    /// up front lets callers see the failure.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        let mut chars = self.name.chars();
        match chars.next() {
            None => return Err("name is empty"),
            Some(first) if !first.is_ascii_alphabetic() => {
                return Err("name must start with an ASCII letter")
            }
            Some(_) => {}
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err("name is longer than 255 characters");
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
            return Err("name may only contain ASCII alphanumerics and '_', '.', '-', '/'");
        }
        Ok(())
    }

    pub(crate) fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|reason| TelemetryError::InvalidInstrument {
                name: self.name.to_string(),
                reason,
            })
    }
}
