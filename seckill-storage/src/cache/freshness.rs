//! Read results that carry where the value came from.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Where a cache read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Served from the cache, including a cached absence.
    Hit,
    /// Nothing in the cache and the loader was not consulted.
    Miss,
    /// Loaded from the durable store and written back to the cache.
    Loaded,
    /// Logically expired value served while a rebuild runs elsewhere.
    Stale,
    /// The KV store failed; the loader was called directly and nothing was cached.
    Bypassed,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Hit => "hit",
            ReadSource::Miss => "miss",
            ReadSource::Loaded => "loaded",
            ReadSource::Stale => "stale",
            ReadSource::Bypassed => "bypassed",
        }
    }

    /// True when the loader was called to produce this read.
    pub fn reached_loader(&self) -> bool {
        matches!(self, ReadSource::Loaded | ReadSource::Bypassed)
    }
}

impl fmt::Display for ReadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a cache read, carrying its source.
///
/// Cache reads return `CacheRead<Option<V>>`: `None` is the NotFound answer,
/// whether it came from a cached absence or from the loader.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
    read_at: DateTime<Utc>,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, source: ReadSource) -> Self {
        Self {
            value,
            source,
            read_at: Utc::now(),
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::Stale
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    /// Time since the read completed.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.read_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
            read_at: self.read_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
