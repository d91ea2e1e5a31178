//! Telemetry Samples
//!
//! Fixed-shape metric maps emitted by the device model. The key set must be
//! identical between baseline training and classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric key: packets processed per second.
pub const METRIC_PACKET_RATE: &str = "packet_rate";
/// Metric key: error events since the previous sample.
pub const METRIC_ERRORS: &str = "errors";
/// Metric key: CPU load percentage.
pub const METRIC_CPU: &str = "cpu";

/// One telemetry sample: metric name to numeric value, in key order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetrySample(BTreeMap<String, f64>);

impl TelemetrySample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Sorted metric names. Two samples share a schema iff these are equal.
    pub fn schema(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    pub fn same_schema(&self, other: &TelemetrySample) -> bool {
        self.0.len() == other.0.len()
            && self.0.keys().zip(other.0.keys()).all(|(a, b)| a == b)
    }

    /// Values in schema (key) order.
    pub fn values(&self) -> Vec<f64> {
        self.0.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for TelemetrySample {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
