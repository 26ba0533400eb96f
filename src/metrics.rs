//! Metrics sink seam (spec §1 "Out of scope... consumed as: publish
//! counters/gauges to a sink that accepts (name, labels, value)"). This
//! crate owns the call sites; exposition is an external collaborator's
//! job.

/// Counter/gauge sink the core reports outcomes to. The front door wires
/// in a real exporter; tests and standalone use get [`NoopMetricsSink`],
/// and a deployment without one wired up yet gets [`TracingMetricsSink`].
pub trait MetricsSink: Send + Sync {
    fn record_counter(&self, name: &str, labels: &[(&str, &str)], value: f64);

    fn record_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);

    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.record_counter(name, labels, 1.0);
    }
}

/// Discards everything. Default when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_counter(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
    fn record_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Emits every counter/gauge as a `tracing` event instead of discarding it.
/// For environments that want the outcome stream visible in logs without
/// wiring up a real metrics exporter yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_counter(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        tracing::debug!(metric = name, kind = "counter", value, labels = ?labels, "metric");
    }

    fn record_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        tracing::debug!(metric = name, kind = "gauge", value, labels = ?labels, "metric");
    }
}
