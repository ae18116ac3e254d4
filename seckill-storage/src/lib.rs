//! Seckill Storage - KV Store, Locks, Ids and Cache
//!
//! Everything here that needs cross-instance coordination is built on the
//! [`KvStore`] primitives; durable records go through [`SeckillStore`].

pub mod cache;
pub mod durable;
pub mod ids;
pub mod kv;
pub mod lock;

pub use cache::{
    loader_fn, CacheClient, CacheConfig, CacheKey, CacheRead, CacheStats, FnLoader, Loader,
    LogicalEntry, ReadSource, RebuildPool, SubmitError, ABSENT_SENTINEL,
};
pub use durable::{InsertOutcome, MemorySeckillStore, OrderTransaction, SeckillStore};
pub use ids::{IdGenerator, IdParts};
pub use kv::{KvStore, MemoryKvStore};
#[cfg(feature = "redis")]
pub use kv::RedisKvStore;
pub use lock::DistributedLock;
