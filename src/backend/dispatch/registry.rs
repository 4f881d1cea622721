//! Future registry
//!
//! Maps call fingerprints to their pending computations. One registry is
//! owned per program run and handed to the dispatch runtime explicitly.
//!
//! # Design
//!
//! - DashMap entry API makes "insert if absent" atomic per fingerprint
//! - Entries live until removed; `evict_completed` bounds growth for
//!   long-running programs
//! - Counters are lock-free atomics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::fingerprint::CallFingerprint;
use super::pending::{PendingComputation, PendingState};

pub struct FutureRegistry {
    entries: DashMap<CallFingerprint, Arc<PendingComputation>>,
    submitted: AtomicU64,
    reused: AtomicU64,
    completed: AtomicU64,
    faulted: AtomicU64,
}

impl std::fmt::Debug for FutureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureRegistry")
            .field("entries", &self.entries.len())
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("reused", &self.reused.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for FutureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            submitted: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            faulted: AtomicU64::new(0),
        }
    }

    /// Return the computation registered under `fingerprint`, creating it
    /// with `make` if absent. The flag is true when `make` was called.
    pub fn get_or_insert_with<F>(
        &self,
        fingerprint: CallFingerprint,
        make: F,
    ) -> (Arc<PendingComputation>, bool)
    where
        F: FnOnce() -> PendingComputation,
    {
        match self.entries.entry(fingerprint) {
            Entry::Occupied(entry) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                (Arc::clone(entry.get()), false)
            }
            Entry::Vacant(entry) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::new(make());
                entry.insert(Arc::clone(&pending));
                (pending, true)
            }
        }
    }

    pub fn get(&self, fingerprint: &CallFingerprint) -> Option<Arc<PendingComputation>> {
        self.entries.get(fingerprint).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, fingerprint: &CallFingerprint) -> Option<Arc<PendingComputation>> {
        self.entries.remove(fingerprint).map(|(_, pending)| pending)
    }

    /// Drop every terminal entry, returning how many were removed
    pub fn evict_completed(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| !pending.state().is_terminal());
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Record how a computation run by the runtime ended
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.faulted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let in_flight = self
            .entries
            .iter()
            .filter(|entry| matches!(entry.value().state(), PendingState::Created | PendingState::Running))
            .count();
        RegistryStats {
            entries: self.entries.len(),
            in_flight,
            submitted: self.submitted.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub entries: usize,
    pub in_flight: usize,
    /// Computations created
    pub submitted: u64,
    /// Submissions satisfied by an existing entry
    pub reused: u64,
    pub completed: u64,
    pub faulted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::models::Value;
    use std::thread;

    fn fp(n: i64) -> CallFingerprint {
        CallFingerprint::new("t", "f", &[Value::Int(n)])
    }

    fn pending(n: i64) -> PendingComputation {
        PendingComputation::new(fp(n), Box::new(move || Ok(Value::Int(n))))
    }

    #[test]
    fn test_insert_then_reuse() {
        let registry = FutureRegistry::new();
        let (a, created_a) = registry.get_or_insert_with(fp(1), || pending(1));
        let (b, created_b) = registry.get_or_insert_with(fp(1), || pending(1));
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));

        let stats = registry.stats();
        assert_eq!((stats.submitted, stats.reused, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_concurrent_insert_is_atomic() {
        let registry = Arc::new(FutureRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_insert_with(fp(7), || pending(7)).1)
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|&c| c)
            .count();
        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evict_completed() {
        let registry = FutureRegistry::new();
        let (done, _) = registry.get_or_insert_with(fp(1), || pending(1));
        registry.get_or_insert_with(fp(2), || pending(2));
        done.run();

        assert_eq!(registry.stats().in_flight, 1);
        assert_eq!(registry.evict_completed(), 1);
        assert!(registry.get(&fp(1)).is_none());
        assert!(registry.get(&fp(2)).is_some());
    }

    #[test]
    fn test_remove() {
        let registry = FutureRegistry::new();
        registry.get_or_insert_with(fp(1), || pending(1));
        assert!(registry.remove(&fp(1)).is_some());
        assert!(registry.is_empty());
    }
}
