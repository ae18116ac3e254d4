//! Cache-aside layer over the shared KV store.
//!
//! # Strategies
//!
//! | Strategy          | Defeats      | Miss behaviour                         |
//! |-------------------|--------------|----------------------------------------|
//! | pass-through      | penetration  | load, cache value or absence sentinel  |
//! | logical expiry    | breakdown    | NotFound (keys are pre-warmed)         |
//! | mutex rebuild     | breakdown    | one caller loads, the rest wait        |
//!
//! Reads return [`CacheRead`], which records whether the value came from
//! the cache, the loader, or a stale entry awaiting rebuild.
//!
//! # Example
//!
//! ```ignore
//! let client = CacheClient::new(kv.clone(), lock.clone(), &settings.cache);
//! let loader = loader_fn(move |id: ResourceId| {
//!     let store = store.clone();
//!     async move { store.get_resource(id).await }
//! });
//!
//! let read = client.query_with_pass_through("cache:resource:", &id, &loader).await?;
//! if read.source().reached_loader() {
//!     tracing::debug!("cold read");
//! }
//! ```

pub mod client;
pub mod entry;
pub mod freshness;
pub mod loader;
pub mod rebuild;
pub mod stats;

pub use client::{CacheClient, CacheConfig};
pub use entry::{CacheKey, LogicalEntry, ABSENT_SENTINEL};
pub use freshness::{CacheRead, ReadSource};
pub use loader::{loader_fn, FnLoader, Loader};
pub use rebuild::{RebuildJob, RebuildPool, SubmitError};
pub use stats::CacheStats;
