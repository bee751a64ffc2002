//! Shared-state collaborator contract and the in-memory backend.
//!
//! Module snapshots and the distributed reduction accumulator live in an
//! external store (redis in production). The runtime only needs an integer
//! cell API; the `inmemory` state mode ships in-tree and backs single-host
//! deployments and tests.

use dashmap::DashMap;

/// Integer cells in the external store.
pub trait StateStore: Send + Sync {
    fn set_long(&self, key: &str, value: i64);

    /// Atomically add `delta`, returning the new value.
    fn incr_by_long(&self, key: &str, delta: i64) -> i64;

    /// Read the cell, zero if absent.
    fn get_long(&self, key: &str) -> i64;
}

/// The `inmemory` state mode.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    cells: DashMap<String, i64>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn set_long(&self, key: &str, value: i64) {
        self.cells.insert(key.to_owned(), value);
    }

    fn incr_by_long(&self, key: &str, delta: i64) -> i64 {
        *self
            .cells
            .entry(key.to_owned())
            .and_modify(|v| *v += delta)
            .or_insert(delta)
    }

    fn get_long(&self, key: &str) -> i64 {
        self.cells.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_accumulates_from_zero() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.get_long("acc"), 0);
        assert_eq!(store.incr_by_long("acc", 3), 3);
        assert_eq!(store.incr_by_long("acc", -1), 2);
        assert_eq!(store.get_long("acc"), 2);
    }

    #[test]
    fn set_overwrites() {
        let store = InMemoryStateStore::new();
        store.incr_by_long("acc", 41);
        store.set_long("acc", 0);
        assert_eq!(store.get_long("acc"), 0);
    }

    #[test]
    fn incr_is_atomic_across_threads() {
        let store = std::sync::Arc::new(InMemoryStateStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    store.incr_by_long("acc", 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_long("acc"), 8000);
    }
}
