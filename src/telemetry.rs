// Outbound reporting: telemetry key/value sink and fault notifier
//
// The drivetrain core only ever writes to these. What happens to the data
// (zenoh publish, dashboard, log file) is up to the implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// A single telemetry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Number(v)
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Flag(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

/// Fire-and-forget key/value publisher
pub trait TelemetrySink: Send {
    fn put(&mut self, key: &str, value: TelemetryValue);
}

/// Shared handle, so the runtime can drain what the drivetrain wrote
impl<T: TelemetrySink> TelemetrySink for Arc<Mutex<T>> {
    fn put(&mut self, key: &str, value: TelemetryValue) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .put(key, value);
    }
}

/// Severity of a raised fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    Warning,
    Error,
}

/// A named fault raised by the drivetrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    pub severity: FaultSeverity,
    pub message: String,
    /// Persistent faults stay raised until the process restarts
    pub persistent: bool,
}

impl Fault {
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity: FaultSeverity::Warning,
            message: message.into(),
            persistent: false,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity: FaultSeverity::Error,
            message: message.into(),
            persistent: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Receives faults. Alert lifecycle (hysteresis, clearing) lives elsewhere.
pub trait FaultNotifier: Send {
    fn raise(&mut self, fault: Fault);
}

impl<T: FaultNotifier> FaultNotifier for Arc<Mutex<T>> {
    fn raise(&mut self, fault: Fault) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .raise(fault);
    }
}

/// Telemetry sink that buffers one frame of values until drained
#[derive(Debug, Default, Clone)]
pub struct FrameSink {
    values: BTreeMap<String, TelemetryValue>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the buffered frame, leaving the sink empty
    pub fn drain(&mut self) -> BTreeMap<String, TelemetryValue> {
        std::mem::take(&mut self.values)
    }
}

impl TelemetrySink for FrameSink {
    fn put(&mut self, key: &str, value: TelemetryValue) {
        self.values.insert(key.to_string(), value);
    }
}

/// Fault notifier that logs each fault and remembers the raised set
#[derive(Debug, Default, Clone)]
pub struct FaultLog {
    raised: Vec<Fault>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &[Fault] {
        &self.raised
    }

    pub fn contains(&self, name: &str) -> bool {
        self.raised.iter().any(|f| f.name == name)
    }
}

impl FaultNotifier for FaultLog {
    fn raise(&mut self, fault: Fault) {
        match fault.severity {
            FaultSeverity::Warning => warn!("Fault raised [{}]: {}", fault.name, fault.message),
            FaultSeverity::Error => error!("Fault raised [{}]: {}", fault.name, fault.message),
        }
        // Same name raised again replaces the earlier entry
        self.raised.retain(|f| f.name != fault.name);
        self.raised.push(fault);
    }
}
