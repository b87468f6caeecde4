// Write-only key/value telemetry, kept behind a narrow trait so the drive never
// depends on a particular dashboard

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

/// Fire-and-forget dashboard sink
pub trait TelemetrySink {
    fn put(&mut self, key: &str, value: TelemetryValue);

    fn put_number(&mut self, key: &str, value: f64) {
        self.put(key, TelemetryValue::Number(value));
    }

    fn put_bool(&mut self, key: &str, value: bool) {
        self.put(key, TelemetryValue::Bool(value));
    }

    fn put_text(&mut self, key: &str, value: &str) {
        self.put(key, TelemetryValue::Text(value.to_string()));
    }
}

/// Emits every entry as a `trace!` event (enable with RUST_LOG=swerve_runtime::telemetry=trace)
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn put(&mut self, key: &str, value: TelemetryValue) {
        trace!(key, ?value, "telemetry");
    }
}

/// Latest value per key, like a dashboard table
#[derive(Debug, Default, Clone, Serialize)]
pub struct MemorySink {
    entries: BTreeMap<String, TelemetryValue>,
}

impl MemorySink {
    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn put(&mut self, key: &str, value: TelemetryValue) {
        self.entries.insert(key.to_string(), value);
    }
}
