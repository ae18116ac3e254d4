//! Shared key-value store abstraction.
//!
//! Every cross-instance guarantee in this crate (lock ownership, id
//! uniqueness, rebuild exclusivity) is derived from the per-key atomicity of
//! the primitives below. Implementations must never emulate them with a
//! client-side read followed by a write.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryKvStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisKvStore;

use async_trait::async_trait;
use seckill_core::SeckillResult;
use std::time::Duration;

/// Async contract of the shared KV store.
///
/// Values are UTF-8 strings. Callers serialize structured payloads as JSON.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name used in logs and store errors.
    fn backend_name(&self) -> &'static str;

    /// Read a key. Expired keys read as `None`.
    async fn get(&self, key: &str) -> SeckillResult<Option<String>>;

    /// Unconditionally write a key. `None` means no store-level expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()>;

    /// Atomic set-if-absent with a TTL. Returns true iff the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool>;

    /// Atomic increment. A missing key counts from zero, so the first call
    /// returns 1. Any existing TTL is kept.
    async fn increment(&self, key: &str) -> SeckillResult<i64>;

    /// Atomic compare-and-delete: removes the key only if its current value
    /// equals `expected`. Returns true iff a key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> SeckillResult<bool>;

    /// Unconditional delete. Returns true iff a live key was removed.
    async fn delete(&self, key: &str) -> SeckillResult<bool>;

    /// Round-trip check used by health reporting.
    async fn ping(&self) -> SeckillResult<()>;
}
