//! Process-wide counters.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub graphs_captured: Counter,
    pub compilations: Counter,
    pub cache_hits: Counter,
    pub executions: Counter,
    pub execution_failures: Counter,
    pub host_to_device: Counter,
    pub device_to_host: Counter,
    pub syncs: Counter,
}

static METRICS: Metrics = Metrics {
    graphs_captured: Counter::new(),
    compilations: Counter::new(),
    cache_hits: Counter::new(),
    executions: Counter::new(),
    execution_failures: Counter::new(),
    host_to_device: Counter::new(),
    device_to_host: Counter::new(),
    syncs: Counter::new(),
};

pub fn metrics() -> &'static Metrics {
    &METRICS
}

impl Metrics {
    fn entries(&self) -> [(&'static str, &Counter); 8] {
        [
            ("GraphsCaptured", &self.graphs_captured),
            ("Compilations", &self.compilations),
            ("CacheHits", &self.cache_hits),
            ("Executions", &self.executions),
            ("ExecutionFailures", &self.execution_failures),
            ("HostToDevice", &self.host_to_device),
            ("DeviceToHost", &self.device_to_host),
            ("Syncs", &self.syncs),
        ]
    }

    /// Current value of the named counter.
    pub fn value(&self, name: &str) -> Option<u64> {
        self.entries().iter().find(|(n, _)| *n == name).map(|(_, c)| c.get())
    }
}

/// One `Counter: <name>` / `  Value: <n>` block per counter.
pub fn metrics_report() -> String {
    let mut out = String::new();
    for (name, counter) in metrics().entries() {
        let _ = writeln!(out, "Counter: {name}\n  Value: {}", counter.get());
    }
    out
}

/// Zero every counter.
pub fn reset() {
    metrics().entries().iter().for_each(|(_, c)| c.reset());
}
