//! Cache-aside client with penetration and breakdown protection.
//!
//! Three read strategies share one KV store and one lock:
//!
//! - [`CacheClient::query_with_pass_through`] caches confirmed absences
//!   under a short TTL, so lookups for ids that do not exist stop reaching
//!   the durable store.
//! - [`CacheClient::query_with_logical_expire`] serves hot keys that never
//!   expire at the store level. Past their logical deadline the stale value is
//!   returned at once and a single background rebuild is scheduled.
//! - [`CacheClient::query_with_mutex`] makes concurrent misses wait for one
//!   rebuilder instead of all hitting the loader.
//!
//! A KV fault on a read path never fails the read: the loader is called
//! directly and nothing is cached. Loader faults are propagated.

use super::entry::{CacheKey, LogicalEntry, ABSENT_SENTINEL};
use super::freshness::{CacheRead, ReadSource};
use super::loader::Loader;
use super::rebuild::RebuildPool;
use super::stats::{CacheCounters, CacheStats};
use crate::kv::KvStore;
use crate::lock::DistributedLock;
use chrono::Utc;
use seckill_core::{
    CacheSettings, HealthCheck, LeaseToken, SeckillError, SeckillResult, StoreError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Per-client tuning, derived from [`CacheSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub entry_ttl: Duration,
    pub null_ttl: Duration,
    pub logical_window: Duration,
    pub rebuild_lock_namespace: String,
    pub rebuild_lock_ttl: Duration,
    pub mutex_retry_delay: Duration,
    pub mutex_max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            entry_ttl: settings.entry_ttl,
            null_ttl: settings.null_ttl,
            logical_window: settings.logical_window,
            rebuild_lock_namespace: settings.rebuild_lock_namespace.clone(),
            rebuild_lock_ttl: settings.rebuild_lock_ttl,
            mutex_retry_delay: settings.mutex_retry_delay,
            mutex_max_attempts: settings.mutex_max_attempts,
        }
    }
}

impl CacheConfig {
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl = ttl;
        self
    }

    pub fn with_logical_window(mut self, window: Duration) -> Self {
        self.logical_window = window;
        self
    }

    pub fn with_mutex_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.mutex_retry_delay = delay;
        self.mutex_max_attempts = max_attempts.max(1);
        self
    }
}

/// What a plain (TTL-managed) key currently holds.
enum PlainRead<V> {
    Value(V),
    Absent,
    Missing,
    Fault(SeckillError),
}

pub struct CacheClient {
    kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    config: CacheConfig,
    rebuilds: RebuildPool,
    counters: Arc<CacheCounters>,
}

impl CacheClient {
    /// Build a client and start its rebuild workers on the current runtime.
    pub fn new(kv: Arc<dyn KvStore>, lock: DistributedLock, settings: &CacheSettings) -> Self {
        let rebuilds =
            RebuildPool::spawn(settings.rebuild_workers, settings.rebuild_queue_capacity);
        Self::with_pool(kv, lock, CacheConfig::from(settings), rebuilds)
    }

    pub fn with_pool(
        kv: Arc<dyn KvStore>,
        lock: DistributedLock,
        config: CacheConfig,
        rebuilds: RebuildPool,
    ) -> Self {
        Self {
            kv,
            lock,
            config,
            rebuilds,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub fn rebuild_pool(&self) -> &RebuildPool {
        &self.rebuilds
    }

    /// Wait for every scheduled rebuild to finish.
    pub async fn wait_for_rebuilds(&self) {
        self.rebuilds.wait_idle().await;
    }

    // ------------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------------

    /// Write a plain entry with a store-level TTL.
    pub async fn set_with_ttl<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> SeckillResult<()> {
        let payload = encode(key, value)?;
        self.kv.set(key, &payload, Some(ttl)).await
    }

    /// Write a logical-expiry entry that goes stale `window` from now.
    /// This is how hot keys are warmed before traffic arrives.
    pub async fn set_with_logical_expire<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        window: Duration,
    ) -> SeckillResult<()> {
        let payload = encode(key, &LogicalEntry::fresh(value, window))?;
        self.kv.set(key, &payload, None).await
    }

    /// Drop a cached entry after the durable record changed.
    ///
    /// Update the durable store first, then invalidate; the next read reloads.
    pub async fn invalidate(&self, key: &str) -> SeckillResult<bool> {
        let removed = self.kv.delete(key).await?;
        tracing::debug!(key, removed, "cache entry invalidated");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Pass-through
    // ------------------------------------------------------------------------

    pub async fn query_with_pass_through<K, V, L>(
        &self,
        key_prefix: &str,
        id: &K,
        loader: &L,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Display + Send + Sync,
        V: Serialize + DeserializeOwned + Send,
        L: Loader<K, V> + ?Sized,
    {
        let key = CacheKey::new(key_prefix, id);

        match self.read_plain::<V>(&key).await {
            PlainRead::Value(value) => {
                CacheCounters::bump(&self.counters.hits);
                Ok(CacheRead::new(Some(value), ReadSource::Hit))
            }
            PlainRead::Absent => {
                CacheCounters::bump(&self.counters.absent_hits);
                tracing::debug!(key = %key, "absence sentinel hit");
                Ok(CacheRead::new(None, ReadSource::Hit))
            }
            PlainRead::Missing => {
                CacheCounters::bump(&self.counters.misses);
                self.load_and_fill(&key, id, loader).await
            }
            PlainRead::Fault(e) => self.bypass(&key, id, loader, e).await,
        }
    }

    // ------------------------------------------------------------------------
    // Logical expiry
    // ------------------------------------------------------------------------

    /// Read a pre-warmed hot key.
    ///
    /// A missing key means the record does not exist: neither the loader nor
    /// the rebuild lock is touched. An expired entry is returned as
    /// [`ReadSource::Stale`] after at most one rebuild has been scheduled.
    pub async fn query_with_logical_expire<K, V, L>(
        &self,
        key_prefix: &str,
        id: K,
        loader: Arc<L>,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Display + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: Loader<K, V> + ?Sized + 'static,
    {
        let key = CacheKey::new(key_prefix, &id);

        let raw = match self.kv.get(key.as_str()).await {
            Ok(Some(raw)) if raw != ABSENT_SENTINEL => raw,
            Ok(_) => {
                CacheCounters::bump(&self.counters.misses);
                return Ok(CacheRead::new(None, ReadSource::Miss));
            }
            Err(e) => return self.bypass(&key, &id, loader.as_ref(), e).await,
        };

        let entry: LogicalEntry<V> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                let err = StoreError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                tracing::error!(key = %key, error = %err, "corrupt logical-expiry entry");
                return self.bypass(&key, &id, loader.as_ref(), err.into()).await;
            }
        };

        if !entry.is_expired(Utc::now()) {
            CacheCounters::bump(&self.counters.hits);
            return Ok(CacheRead::new(Some(entry.data), ReadSource::Hit));
        }

        CacheCounters::bump(&self.counters.stale_reads);
        self.schedule_rebuild::<K, V, L>(key, id, loader).await;
        Ok(CacheRead::new(Some(entry.data), ReadSource::Stale))
    }

    async fn schedule_rebuild<K, V, L>(&self, key: CacheKey, id: K, loader: Arc<L>)
    where
        K: Display + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: Loader<K, V> + ?Sized + 'static,
    {
        let lock_name = self.rebuild_lock_name(&key);
        let token = LeaseToken::generate();

        match self
            .lock
            .try_acquire(&lock_name, &token, self.config.rebuild_lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key = %key, "rebuild already in flight");
                return;
            }
            Err(e) => {
                CacheCounters::bump(&self.counters.store_faults);
                tracing::warn!(key = %key, error = %e, "could not take rebuild lock; serving stale");
                return;
            }
        }

        let job = rebuild_job::<K, V, L>(RebuildContext {
            kv: Arc::clone(&self.kv),
            lock: self.lock.clone(),
            counters: Arc::clone(&self.counters),
            key: key.clone(),
            lock_name: lock_name.clone(),
            token: token.clone(),
            window: self.config.logical_window,
            id,
            loader,
        });

        match self.rebuilds.try_submit(job) {
            Ok(()) => {
                CacheCounters::bump(&self.counters.rebuilds_scheduled);
                tracing::debug!(key = %key, "rebuild scheduled");
            }
            Err(reason) => {
                CacheCounters::bump(&self.counters.rebuilds_dropped);
                tracing::warn!(key = %key, reason = %reason, "rebuild dropped");
                if let Err(e) = self.lock.release(&lock_name, &token).await {
                    tracing::warn!(key = %key, error = %e, "failed to release rebuild lock");
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Mutex rebuild
    // ------------------------------------------------------------------------

    /// Pass-through read where only the rebuild-lock holder calls the loader.
    ///
    /// Callers that lose the race sleep and re-read. After
    /// `mutex_max_attempts` they stop waiting and call the loader directly.
    pub async fn query_with_mutex<K, V, L>(
        &self,
        key_prefix: &str,
        id: &K,
        loader: &L,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Display + Send + Sync,
        V: Serialize + DeserializeOwned + Send,
        L: Loader<K, V> + ?Sized,
    {
        let key = CacheKey::new(key_prefix, id);
        let lock_name = self.rebuild_lock_name(&key);

        for attempt in 0..self.config.mutex_max_attempts {
            match self.read_plain::<V>(&key).await {
                PlainRead::Value(value) => {
                    CacheCounters::bump(&self.counters.hits);
                    return Ok(CacheRead::new(Some(value), ReadSource::Hit));
                }
                PlainRead::Absent => {
                    CacheCounters::bump(&self.counters.absent_hits);
                    return Ok(CacheRead::new(None, ReadSource::Hit));
                }
                PlainRead::Fault(e) => return self.bypass(&key, id, loader, e).await,
                PlainRead::Missing => {}
            }

            let token = LeaseToken::generate();
            match self
                .lock
                .try_acquire(&lock_name, &token, self.config.rebuild_lock_ttl)
                .await
            {
                Ok(true) => {
                    let result = self.fill_under_lock(&key, id, loader).await;
                    if let Err(e) = self.lock.release(&lock_name, &token).await {
                        tracing::warn!(key = %key, error = %e, "failed to release rebuild lock");
                    }
                    return result;
                }
                Ok(false) => {
                    tracing::debug!(key = %key, attempt, "waiting for rebuild lock");
                    tokio::time::sleep(self.config.mutex_retry_delay).await;
                }
                Err(e) => return self.bypass(&key, id, loader, e).await,
            }
        }

        tracing::warn!(
            key = %key,
            attempts = self.config.mutex_max_attempts,
            "gave up waiting for rebuild lock; loading directly"
        );
        CacheCounters::bump(&self.counters.misses);
        CacheCounters::bump(&self.counters.loads);
        let value = loader.load(id).await?;
        Ok(CacheRead::new(value, ReadSource::Bypassed))
    }

    /// Double-checked fill performed while holding the rebuild lock.
    async fn fill_under_lock<K, V, L>(
        &self,
        key: &CacheKey,
        id: &K,
        loader: &L,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Display + Send + Sync,
        V: Serialize + DeserializeOwned + Send,
        L: Loader<K, V> + ?Sized,
    {
        match self.read_plain::<V>(key).await {
            PlainRead::Value(value) => {
                CacheCounters::bump(&self.counters.hits);
                Ok(CacheRead::new(Some(value), ReadSource::Hit))
            }
            PlainRead::Absent => {
                CacheCounters::bump(&self.counters.absent_hits);
                Ok(CacheRead::new(None, ReadSource::Hit))
            }
            PlainRead::Missing => {
                CacheCounters::bump(&self.counters.misses);
                self.load_and_fill(key, id, loader).await
            }
            PlainRead::Fault(e) => self.bypass(key, id, loader, e).await,
        }
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    async fn read_plain<V: DeserializeOwned>(&self, key: &CacheKey) -> PlainRead<V> {
        match self.kv.get(key.as_str()).await {
            Ok(None) => PlainRead::Missing,
            Ok(Some(raw)) if raw == ABSENT_SENTINEL => PlainRead::Absent,
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => PlainRead::Value(value),
                Err(e) => {
                    // Treated as a miss; the reload overwrites it.
                    tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                    PlainRead::Missing
                }
            },
            Err(e) => PlainRead::Fault(e),
        }
    }

    async fn load_and_fill<K, V, L>(
        &self,
        key: &CacheKey,
        id: &K,
        loader: &L,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Display + Send + Sync,
        V: Serialize + Send,
        L: Loader<K, V> + ?Sized,
    {
        CacheCounters::bump(&self.counters.loads);
        let loaded = loader.load(id).await?;

        let write = match &loaded {
            Some(value) => match encode(key.as_str(), value) {
                Ok(payload) => {
                    self.kv
                        .set(key.as_str(), &payload, Some(self.config.entry_ttl))
                        .await
                }
                Err(e) => Err(e),
            },
            None => {
                tracing::debug!(key = %key, ttl = ?self.config.null_ttl, "caching absence");
                self.kv
                    .set(key.as_str(), ABSENT_SENTINEL, Some(self.config.null_ttl))
                    .await
            }
        };

        if let Err(e) = write {
            CacheCounters::bump(&self.counters.store_faults);
            tracing::warn!(key = %key, error = %e, "cache fill failed; returning loaded value");
        }

        Ok(CacheRead::new(loaded, ReadSource::Loaded))
    }

    async fn bypass<K, V, L>(
        &self,
        key: &CacheKey,
        id: &K,
        loader: &L,
        cause: SeckillError,
    ) -> SeckillResult<CacheRead<Option<V>>>
    where
        K: Send + Sync,
        L: Loader<K, V> + ?Sized,
    {
        CacheCounters::bump(&self.counters.store_faults);
        CacheCounters::bump(&self.counters.misses);
        CacheCounters::bump(&self.counters.loads);
        tracing::warn!(key = %key, error = %cause, "cache unavailable; reading durable store directly");
        let value = loader.load(id).await?;
        Ok(CacheRead::new(value, ReadSource::Bypassed))
    }

    fn rebuild_lock_name(&self, key: &CacheKey) -> String {
        format!("{}{}", self.config.rebuild_lock_namespace, key)
    }

    /// KV reachability plus rebuild-pool pressure.
    pub async fn health(&self) -> HealthCheck {
        let started = std::time::Instant::now();
        let ping = self.kv.ping().await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let stats = self.stats();

        let check = match ping {
            Err(e) => HealthCheck::unhealthy("cache", e.to_string()),
            Ok(()) if stats.rebuilds_dropped > 0 => HealthCheck::degraded(
                "cache",
                format!("{} rebuilds dropped", stats.rebuilds_dropped),
            ),
            Ok(()) => HealthCheck::healthy("cache"),
        };

        check
            .with_response_time(elapsed_ms)
            .with_metadata("backend", serde_json::json!(self.kv.backend_name()))
            .with_metadata("pending_rebuilds", serde_json::json!(self.rebuilds.pending()))
            .with_metadata("hit_rate", serde_json::json!(stats.hit_rate()))
    }
}

fn encode<V: Serialize + ?Sized>(key: &str, value: &V) -> SeckillResult<String> {
    serde_json::to_string(value).map_err(|e| {
        StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

struct RebuildContext<K, L: ?Sized> {
    kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    counters: Arc<CacheCounters>,
    key: CacheKey,
    lock_name: String,
    token: LeaseToken,
    window: Duration,
    id: K,
    loader: Arc<L>,
}

fn rebuild_job<K, V, L>(ctx: RebuildContext<K, L>) -> super::rebuild::RebuildJob
where
    K: Display + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    L: Loader<K, V> + ?Sized + 'static,
{
    Box::pin(async move {
        let RebuildContext {
            kv,
            lock,
            counters,
            key,
            lock_name,
            token,
            window,
            id,
            loader,
        } = ctx;

        let outcome = rebuild_once::<K, V, L>(kv.as_ref(), &key, &id, loader.as_ref(), window).await;
        match outcome {
            Ok(()) => CacheCounters::bump(&counters.rebuilds_completed),
            Err(e) => {
                CacheCounters::bump(&counters.rebuilds_failed);
                tracing::warn!(key = %key, error = %e, "rebuild failed; stale value kept");
            }
        }

        if let Err(e) = lock.release(&lock_name, &token).await {
            tracing::warn!(key = %key, error = %e, "failed to release rebuild lock");
        }
    })
}

async fn rebuild_once<K, V, L>(
    kv: &dyn KvStore,
    key: &CacheKey,
    id: &K,
    loader: &L,
    window: Duration,
) -> SeckillResult<()>
where
    K: Send + Sync,
    V: Serialize + DeserializeOwned + Send,
    L: Loader<K, V> + ?Sized,
{
    // Another rebuild may have landed between our stale read and our lock.
    if let Some(raw) = kv.get(key.as_str()).await? {
        if let Ok(current) = serde_json::from_str::<LogicalEntry<V>>(&raw) {
            if !current.is_expired(Utc::now()) {
                tracing::debug!(key = %key, "entry already rebuilt");
                return Ok(());
            }
        }
    }

    match loader.load(id).await? {
        Some(value) => {
            let payload = encode(key.as_str(), &LogicalEntry::fresh(&value, window))?;
            kv.set(key.as_str(), &payload, None).await?;
            tracing::debug!(key = %key, window = ?window, "logical-expiry entry rebuilt");
        }
        None => {
            kv.delete(key.as_str()).await?;
            tracing::info!(key = %key, "record gone from durable store; hot key removed");
        }
    }
    Ok(())
}
