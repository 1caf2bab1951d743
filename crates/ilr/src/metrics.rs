//! Lift metrics using metrics-rs.
//!
//! The library only records through the `metrics` facade. [`CounterRecorder`]
//! is a small in-process recorder for callers that want batch totals without
//! an exporter.

use std::collections::BTreeMap;
use std::sync::Arc;

use ilr_isa::Arch;
use ilr_lift::MethodAnalysisSession;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter, describe_counter,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

pub const METHODS_LIFTED: &str = "ilr_methods_lifted_total";
pub const METHODS_TAINTED: &str = "ilr_methods_tainted_total";
pub const METHODS_FAILED: &str = "ilr_methods_failed_total";
pub const ACTIONS_EMITTED: &str = "ilr_actions_total";
pub const UNRESOLVED_MARKERS: &str = "ilr_unresolved_total";

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(METHODS_LIFTED, Unit::Count, "Methods lifted, tainted or not");
    describe_counter!(METHODS_TAINTED, Unit::Count, "Methods whose lift stopped on a taint");
    describe_counter!(METHODS_FAILED, Unit::Count, "Methods that could not be disassembled");
    describe_counter!(ACTIONS_EMITTED, Unit::Count, "Actions produced by lifting");
    describe_counter!(UNRESOLVED_MARKERS, Unit::Count, "Unresolved markers among the actions");
}

/// Record the outcome of one method lift.
pub fn record_session(session: &MethodAnalysisSession) {
    let labels = [("arch", session.arch().to_string())];
    counter!(METHODS_LIFTED, &labels).increment(1);
    if session.is_tainted() {
        counter!(METHODS_TAINTED, &labels).increment(1);
    }
    counter!(ACTIONS_EMITTED, &labels).increment(session.actions().len() as u64);
    counter!(UNRESOLVED_MARKERS, &labels).increment(session.unresolved_count() as u64);
}

/// Record a method that never reached the lifter.
pub fn record_failure(arch: Arch) {
    let labels = [("arch", arch.to_string())];
    counter!(METHODS_FAILED, &labels).increment(1);
}

#[derive(Default)]
struct CounterStorage {
    values: RwLock<FxHashMap<String, u64>>,
}

struct StoredCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for StoredCounter {
    fn increment(&self, value: u64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

/// Recorder that keeps counters in memory. Gauges and histograms are dropped.
#[derive(Default)]
pub struct CounterRecorder {
    counters: Arc<CounterStorage>,
}

impl CounterRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading the counters of this recorder.
    #[must_use]
    pub fn handle(&self) -> CounterHandle {
        CounterHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Install as the global recorder; `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<CounterHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }
}

/// `name{k=v,...}` with labels in key order.
fn key_to_string(key: &Key) -> String {
    let mut labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
    if labels.is_empty() {
        return key.name().to_string();
    }
    labels.sort();
    format!("{}{{{}}}", key.name(), labels.join(","))
}

impl Recorder for CounterRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(StoredCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Read access to the counters of a [`CounterRecorder`].
#[derive(Clone)]
pub struct CounterHandle {
    counters: Arc<CounterStorage>,
}

impl CounterHandle {
    /// Counter value by full key, e.g. `ilr_methods_lifted_total{arch=x86_64}`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    /// Sum of a counter over all label sets.
    #[must_use]
    pub fn total(&self, name: &str) -> u64 {
        self.counters
            .values
            .read()
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.strip_prefix(name).is_some_and(|rest| rest.starts_with('{')))
            .map(|(_, value)| value)
            .sum()
    }

    /// All counters, sorted by key.
    #[must_use]
    pub fn all(&self) -> BTreeMap<String, u64> {
        self.counters
            .values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// One `key: value` line per counter.
    #[must_use]
    pub fn summary(&self) -> String {
        self.all()
            .into_iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_recorder_counts() {
        let recorder = CounterRecorder::new();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_failure(Arch::Arm64);
            record_failure(Arch::Arm64);
            record_failure(Arch::X86);
        });
        assert_eq!(handle.get("ilr_methods_failed_total{arch=arm64}"), Some(2));
        assert_eq!(handle.total(METHODS_FAILED), 3);
        assert_eq!(handle.total(METHODS_LIFTED), 0);
        assert_eq!(handle.summary().lines().count(), 2);
    }
}
