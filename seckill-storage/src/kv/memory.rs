//! In-process KV store.
//!
//! Entries expire lazily: an expired entry is treated as absent by every
//! operation and is physically removed the next time its key is touched.
//! Per-key atomicity comes from holding the DashMap shard lock for the
//! duration of each operation.

use super::KvStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use seckill_core::{SeckillResult, StoreError};
use std::time::Duration;
use tokio::time::Instant;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: String, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// DashMap-backed [`KvStore`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Remaining store-level TTL of a live key. `None` for absent keys and
    /// for keys written without expiry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> SeckillResult<Option<String>> {
        let now = Instant::now();
        // Copy out before touching the map again; the read guard holds the shard.
        let found = self
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));

        match found {
            Some((false, value)) => Ok(Some(value)),
            Some((true, _)) => {
                self.entries.remove_if(key, |_, e| e.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()> {
        let entry = MemoryEntry::new(value.to_string(), ttl, Instant::now());
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool> {
        let now = Instant::now();
        let fresh = MemoryEntry::new(value.to_string(), Some(ttl), now);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str) -> SeckillResult<i64> {
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let entry = occupied.get_mut();
                let current: i64 = entry.value.parse().map_err(|_| StoreError::WrongType {
                    key: key.to_string(),
                    reason: "value is not an integer".to_string(),
                })?;
                let next = current.checked_add(1).ok_or_else(|| StoreError::WrongType {
                    key: key.to_string(),
                    reason: "increment would overflow".to_string(),
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(MemoryEntry::new("1".to_string(), None, now));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new("1".to_string(), None, now));
                Ok(1)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> SeckillResult<bool> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, e| !e.is_expired(now) && e.value == expected);
        Ok(removed.is_some())
    }

    async fn delete(&self, key: &str) -> SeckillResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, e)| !e.is_expired(now)))
    }

    async fn ping(&self) -> SeckillResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seckill_core::SeckillError;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_if_absent_rejects_live_key() {
        let store = MemoryKvStore::new();
        assert!(store
            .set_if_absent("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_reads_absent_and_can_be_reacquired() {
        let store = MemoryKvStore::new();
        store
            .set_if_absent("lock:a", "t1", Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert_eq!(store.get("lock:a").await.unwrap(), None);
        assert!(store
            .set_if_absent("lock:a", "t2", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete_requires_matching_value() {
        let store = MemoryKvStore::new();
        store.set("k", "mine", None).await.unwrap();

        assert!(!store.compare_and_delete("k", "theirs").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("mine"));

        assert!(store.compare_and_delete("k", "mine").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.compare_and_delete("k", "mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_starts_at_one() {
        let store = MemoryKvStore::new();
        assert_eq!(store.increment("icr:x").await.unwrap(), 1);
        assert_eq!(store.increment("icr:x").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_increment_non_integer_is_wrong_type() {
        let store = MemoryKvStore::new();
        store.set("k", "{\"a\":1}", None).await.unwrap();
        let err = store.increment("k").await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::Store(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_keeps_ttl() {
        let store = MemoryKvStore::new();
        store
            .set("counter", "5", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(store.increment("counter").await.unwrap(), 6);
        assert!(store.ttl_remaining("counter").is_some());
    }

    #[tokio::test]
    async fn test_delete_reports_live_removal() {
        let store = MemoryKvStore::new();
        assert!(!store.delete("missing").await.unwrap());
        store.set("k", "v", None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.live_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_distinct() {
        let store = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..500 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("icr:hot").await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen.len(), 500);
        assert_eq!(seen.iter().max(), Some(&500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_if_absent_has_one_winner() {
        let store = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("lock:hot", &format!("t{}", i), Duration::from_secs(10))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
