//! In-flight request accounting

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts one in-flight request until dropped
///
/// Dropping the guard decrements the counter whether the call completed,
/// failed, timed out or unwound.
#[derive(Debug)]
pub struct LoadGuard {
    service_id: String,
    counter: Arc<AtomicUsize>,
}

impl LoadGuard {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-service in-flight counters
#[derive(Clone, Default)]
pub struct LoadTracker {
    counters: Arc<DashMap<String, Arc<AtomicUsize>>>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, service_id: &str) -> LoadGuard {
        let counter = self
            .counters
            .entry(service_id.to_string())
            .or_default()
            .clone();
        counter.fetch_add(1, Ordering::AcqRel);
        LoadGuard {
            service_id: service_id.to_string(),
            counter,
        }
    }

    pub fn active(&self, service_id: &str) -> usize {
        self.counters
            .get(service_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Drop a service's counter; outstanding guards still release their own
    pub fn forget(&self, service_id: &str) {
        self.counters.remove(service_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_increments_and_releases() {
        let tracker = LoadTracker::new();
        let first = tracker.acquire("svc-a");
        let second = tracker.acquire("svc-a");
        assert_eq!(tracker.active("svc-a"), 2);
        assert_eq!(first.service_id(), "svc-a");

        drop(first);
        assert_eq!(tracker.active("svc-a"), 1);
        drop(second);
        assert_eq!(tracker.active("svc-a"), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let tracker = LoadTracker::new();
        let inner = tracker.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.acquire("svc-a");
            panic!("handler blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(tracker.active("svc-a"), 0);
    }

    #[test]
    fn test_forget_with_outstanding_guard() {
        let tracker = LoadTracker::new();
        let guard = tracker.acquire("svc-a");
        tracker.forget("svc-a");
        assert_eq!(tracker.active("svc-a"), 0);
        drop(guard);
        assert_eq!(tracker.active("svc-a"), 0);
    }
}
