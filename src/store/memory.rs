//! Process-local counter store.
//!
//! All counters sit behind one mutex, which makes a multi-key check atomic.
//! Counts are not shared between gateway instances, so this store is only
//! correct when a single gateway serves the traffic.
//!
//! Counters from closed windows are swept the first time a check lands in
//! a newer window, so the map holds at most the keys seen in the current
//! and previous window.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::store::{window_start, CounterStore, CounterStoreError};

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start: u64,
    count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    by_key: HashMap<String, WindowCounter>,
    /// Newest window start a sweep ran for.
    swept_for: u64,
}

impl Counters {
    fn current(&self, key: &str, start: u64) -> u64 {
        self.by_key
            .get(key)
            .filter(|c| c.window_start == start)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    fn sweep(&mut self, start: u64) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|_, c| c.window_start >= start);
        self.swept_for = self.swept_for.max(start);
        before - self.by_key.len()
    }
}

/// In-memory fixed-window counters.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<Counters>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().expect("counter store mutex poisoned")
    }

    /// Count recorded for `key` in the window containing `now_ms`.
    pub fn count(&self, key: &str, window_ms: u64, now_ms: u64) -> u64 {
        self.lock().current(key, window_start(now_ms, window_ms))
    }

    /// Whether `key` is currently tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().by_key.contains_key(key)
    }

    /// Drop counters from windows that ended before `now_ms`.
    pub fn prune(&self, window_ms: u64, now_ms: u64) -> usize {
        self.lock().sweep(window_start(now_ms, window_ms))
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_increment(
        &self,
        keys: &[String],
        limits: &[u64],
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, CounterStoreError> {
        if keys.len() != limits.len() {
            return Err(CounterStoreError::Arity {
                keys: keys.len(),
                limits: limits.len(),
            });
        }

        let start = window_start(now_ms, window_ms);
        let mut counters = self.lock();

        if start > counters.swept_for {
            let evicted = counters.sweep(start);
            if evicted > 0 {
                tracing::debug!(evicted, window_start = start, "Evicted expired rate limit counters");
            }
        }

        let within_limits = keys
            .iter()
            .zip(limits)
            .all(|(key, limit)| counters.current(key, start) < *limit);

        if !within_limits {
            return Ok(false);
        }

        for key in keys {
            let counter = counters.by_key.entry(key.clone()).or_insert(WindowCounter {
                window_start: start,
                count: 0,
            });
            if counter.window_start != start {
                *counter = WindowCounter {
                    window_start: start,
                    count: 0,
                };
            }
            counter.count += 1;
        }

        Ok(true)
    }
}
