use crate::error::{common, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle on a single host counter. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicI64>,
}

impl Counter {
    pub fn increment(&self, amount: i64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Host-side counters of one task, addressed by `(group, name)`.
#[derive(Debug, Default)]
pub struct Counters {
    counters: Mutex<BTreeMap<(String, String), Counter>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a counter, creating it at zero on first use.
    pub fn find_counter(&self, group: &str, name: &str) -> Counter {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .entry((group.to_string(), name.to_string()))
            .or_default()
            .clone()
    }

    pub fn value(&self, group: &str, name: &str) -> Option<i64> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .get(&(group.to_string(), name.to_string()))
            .map(Counter::value)
    }

    /// `(group, name, value)` triples in group/name order.
    pub fn snapshot(&self) -> Vec<(String, String, i64)> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .map(|((group, name), counter)| (group.clone(), name.clone(), counter.value()))
            .collect()
    }
}

/// Worker-assigned counter ids for one session.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    by_id: HashMap<u32, Counter>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering an id rebinds it.
    pub fn register(&mut self, id: u32, counter: Counter) {
        if self.by_id.insert(id, counter).is_some() {
            tracing::debug!("Counter id {} registered twice, keeping the latest", id);
        }
    }

    pub fn increment(&self, id: u32, amount: i64) -> Result<()> {
        let counter = self
            .by_id
            .get(&id)
            .ok_or_else(|| common::unregistered_counter(id))?;
        counter.increment(amount);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_find_counter_shares_value() {
        let counters = Counters::new();
        counters.find_counter("g", "n").increment(2);
        counters.find_counter("g", "n").increment(3);

        assert_eq!(counters.value("g", "n"), Some(5));
        assert_eq!(counters.value("g", "missing"), None);
    }

    #[test]
    fn test_registry_increments_host_counter() {
        let counters = Counters::new();
        let mut registry = CounterRegistry::new();
        registry.register(0, counters.find_counter("wordcount", "WORDS"));

        registry.increment(0, 7).unwrap();
        registry.increment(0, -2).unwrap();

        assert_eq!(counters.value("wordcount", "WORDS"), Some(5));
    }

    #[test]
    fn test_unregistered_id_is_a_protocol_violation() {
        let registry = CounterRegistry::new();
        let err = registry.increment(3, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_UNREGISTERED_COUNTER);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let counters = Counters::new();
        counters.find_counter("b", "x").increment(1);
        counters.find_counter("a", "y").increment(2);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot[0], ("a".to_string(), "y".to_string(), 2));
        assert_eq!(snapshot[1], ("b".to_string(), "x".to_string(), 1));
    }
}
