//! Redis-backed counter store.
//!
//! # Responsibilities
//! - Map logical counter keys to per-window Redis keys
//! - Run the conditional multi-key increment as one Lua script (EVALSHA)
//! - Connect lazily so the gateway starts even when Redis is down
//!
//! # Design Decisions
//! - The script is the unit of atomicity: Redis runs it without
//!   interleaving other commands, so concurrent gateways never over-count
//! - Keys carry their window start; expiry only garbage-collects them
//! - No timeout here: the admission controller owns the deadline

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use tokio::sync::OnceCell;

use crate::store::{window_start, CounterStore, CounterStoreError};

/// KEYS[i] is a per-window counter, ARGV[1] the expiry in ms,
/// ARGV[i + 1] the limit for KEYS[i]. Returns 1 when allowed.
const CHECK_AND_INCREMENT: &str = r#"
for i, key in ipairs(KEYS) do
  local current = tonumber(redis.call('GET', key) or '0')
  if current + 1 > tonumber(ARGV[i + 1]) then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  if redis.call('INCR', key) == 1 then
    redis.call('PEXPIRE', key, ARGV[1])
  end
end
return 1
"#;

/// Counter store shared by every gateway instance through Redis.
pub struct RedisCounterStore {
    client: Client,
    manager: OnceCell<ConnectionManager>,
    script: Script,
}

impl RedisCounterStore {
    /// Create a store for `url`. No connection is made until the first check.
    pub fn new(url: &str) -> Result<Self, CounterStoreError> {
        let client = Client::open(url)
            .map_err(|e| CounterStoreError::Connection(format!("invalid redis url: {}", e)))?;
        Ok(Self {
            client,
            manager: OnceCell::new(),
            script: Script::new(CHECK_AND_INCREMENT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CounterStoreError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new_with_backoff(self.client.clone(), 2, 50, 1)
                    .await
                    .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
                tracing::info!("Connected to redis counter store");
                Ok::<_, CounterStoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

/// Keys expire one full window after their bucket closes.
fn expiry_ms(window_ms: u64, now_ms: u64) -> u64 {
    window_start(now_ms, window_ms) + 2 * window_ms - now_ms
}

fn classify(e: RedisError) -> CounterStoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        CounterStoreError::Connection(e.to_string())
    } else {
        CounterStoreError::Script(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
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
        let mut invocation = self.script.prepare_invoke();
        for key in keys {
            invocation.key(format!("{}:{}", key, start));
        }
        invocation.arg(expiry_ms(window_ms, now_ms));
        for limit in limits {
            invocation.arg(*limit);
        }

        let mut conn = self.connection().await?;
        let allowed: i64 = invocation.invoke_async(&mut conn).await.map_err(classify)?;
        Ok(allowed == 1)
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connected", &self.manager.initialized())
            .finish()
    }
}
