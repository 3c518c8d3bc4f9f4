//! Minimal metrics sink contract.
//!
//! Metrics *export* is out of scope (§1 Non-goals); this trait exists only so
//! the scheduler and executor have somewhere to report counters without
//! depending on a concrete metrics backend. The default implementation is a
//! no-op; embedders wire in `metrics`/`prometheus`/whatever fits their stack.

/// Counters and gauges the engine reports as it runs. Implementations must
/// be cheap to call from hot paths (step start/end, dispatcher acquire).
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, value: u64);
    fn record_gauge(&self, name: &str, value: f64);
    fn record_duration_ms(&self, name: &str, value: i64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment_counter(&self, _name: &str, _value: u64) {}
    fn record_gauge(&self, _name: &str, _value: f64) {}
    fn record_duration_ms(&self, _name: &str, _value: i64) {}
}
