use serde_json::Value;
use std::sync::Mutex;

/// Fire-and-forget analytics sink. Implementations must never fail in a way
/// that reaches the caller; dropping an event is always acceptable.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &str, props: Value);
}

/// Sink that discards everything.
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: &str, _props: Value) {}
}

/// Sink that records events in memory, for tests and local debugging.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given name, in emission order.
    pub fn named(&self, event: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|(name, _)| name == event)
            .map(|(_, props)| props)
            .collect()
    }
}

impl TelemetrySink for CapturingSink {
    fn emit(&self, event: &str, props: Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event.to_string(), props));
        }
    }
}
