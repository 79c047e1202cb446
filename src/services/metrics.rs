use std::collections::HashMap;
use std::sync::Mutex;

/// Destination for engine metrics.
///
/// Injected into services instead of a process-wide registry, so tests can
/// observe exactly what one service emitted.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, value: u64);
    fn gauge(&self, name: &'static str, value: f64);
    fn histogram(&self, name: &'static str, value: f64);
}

/// Emits every metric as a `tracing` event under the `metrics` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &'static str, value: u64) {
        tracing::debug!(target: "metrics", metric = name, kind = "counter", value, "metric");
    }

    fn gauge(&self, name: &'static str, value: f64) {
        tracing::debug!(target: "metrics", metric = name, kind = "gauge", value, "metric");
    }

    fn histogram(&self, name: &'static str, value: f64) {
        tracing::debug!(target: "metrics", metric = name, kind = "histogram", value, "metric");
    }
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<&'static str, u64>,
    gauges: HashMap<&'static str, f64>,
    histograms: HashMap<&'static str, Vec<f64>>,
}

/// Keeps metrics in memory for inspection
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.with(|r| r.counters.get(name).copied().unwrap_or(0))
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.with(|r| r.gauges.get(name).copied())
    }

    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.with(|r| r.histograms.get(name).cloned().unwrap_or_default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        // A poisoned lock only means a panicking test; the data is still usable
        let mut guard = self
            .recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str, value: u64) {
        self.with(|r| *r.counters.entry(name).or_insert(0) += value);
    }

    fn gauge(&self, name: &'static str, value: f64) {
        self.with(|r| {
            r.gauges.insert(name, value);
        });
    }

    fn histogram(&self, name: &'static str, value: f64) {
        self.with(|r| r.histograms.entry(name).or_default().push(value));
    }
}
