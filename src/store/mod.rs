//! Shared counter store subsystem.
//!
//! # Data Flow
//! ```text
//! AdmissionController
//!     → CounterStore::check_and_increment(keys, limits, window, now)
//!         → redis_store.rs (one EVALSHA round trip, shared across instances)
//!         → memory.rs (single mutex, single gateway instance only)
//!     ← allowed: bool | CounterStoreError
//! ```
//!
//! # Window semantics
//! Fixed, window-aligned buckets: a request at `now` counts against the
//! bucket starting at `now - now % window_ms`. A check is conjunctive and
//! all-or-nothing: counters are incremented only when every key stays within
//! its limit, so a denied request consumes no quota on any dimension.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;

/// Errors talking to the counter store.
#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    /// The round trip exceeded its deadline.
    #[error("counter store timed out after {0} ms")]
    Timeout(u64),

    /// The store could not be reached.
    #[error("counter store connection error: {0}")]
    Connection(String),

    /// The store answered with something unexpected.
    #[error("counter store script error: {0}")]
    Script(String),

    /// Caller passed mismatched keys and limits.
    #[error("{keys} keys but {limits} limits")]
    Arity { keys: usize, limits: usize },
}

impl CounterStoreError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::Script(_) => "script",
            Self::Arity { .. } => "arity",
        }
    }
}

/// Atomic multi-key conditional increment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment every key's counter for the current window if and only if
    /// all of them stay within their limits. Returns whether the request is
    /// allowed.
    async fn check_and_increment(
        &self,
        keys: &[String],
        limits: &[u64],
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, CounterStoreError>;
}

/// Start of the fixed window containing `now_ms`.
pub fn window_start(now_ms: u64, window_ms: u64) -> u64 {
    now_ms - now_ms % window_ms.max(1)
}
