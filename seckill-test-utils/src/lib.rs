//! Seckill Test Utilities
//!
//! Shared test infrastructure for the seckill workspace:
//! - Fault-injecting KV wrapper and counting loaders
//! - Proptest generators for identifiers and sale resources
//! - Fixtures for sale windows and in-memory stacks
//! - Assertions for purchase outcomes and stock accounting

// Re-export core types for convenience
pub use seckill_core::{
    ActorId, FlashSaleResource, LockScope, Order, OrderId, OrderOutcome, OrderRejection,
    ResourceId, SeckillConfig, SeckillError, SeckillResult, StoreError, Timestamp,
};
pub use seckill_storage::{KvStore, Loader, MemoryKvStore, MemorySeckillStore};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Wraps a [`KvStore`] and fails reads and/or writes on demand.
///
/// Failures surface as [`StoreError::Unavailable`] with backend `flaky`.
pub struct FlakyKvStore {
    inner: Arc<dyn KvStore>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    calls: AtomicU64,
}

impl FlakyKvStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Make `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every mutating primitive fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
    }

    /// Calls seen so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> SeckillResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("flaky", format!("injected {op} fault")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyKvStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> SeckillResult<Option<String>> {
        self.check(&self.fail_reads, "GET")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()> {
        self.check(&self.fail_writes, "SET")?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool> {
        self.check(&self.fail_writes, "SET NX")?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn increment(&self, key: &str) -> SeckillResult<i64> {
        self.check(&self.fail_writes, "INCR")?;
        self.inner.increment(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> SeckillResult<bool> {
        self.check(&self.fail_writes, "compare-and-delete")?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn delete(&self, key: &str) -> SeckillResult<bool> {
        self.check(&self.fail_writes, "DEL")?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> SeckillResult<()> {
        self.check(&self.fail_reads, "PING")?;
        self.inner.ping().await
    }
}

// ============================================================================
// RECORD TABLE AND COUNTING LOADER
// ============================================================================

/// Shared in-memory table standing in for a durable-store table.
pub struct RecordTable<K, V> {
    rows: Arc<DashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> RecordTable<K, V> {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, id: K, value: V) {
        self.rows.insert(id, value);
    }

    pub fn remove(&self, id: &K) -> Option<V> {
        self.rows.remove(id).map(|(_, v)| v)
    }

    pub fn get(&self, id: &K) -> Option<V> {
        self.rows.get(id).map(|r| r.value().clone())
    }
}

impl<K: Eq + Hash, V: Clone> Default for RecordTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for RecordTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

/// [`Loader`] over a [`RecordTable`] that counts every call.
///
/// A gated loader parks every call after counting it until
/// [`CountingLoader::open_gate`] is called.
pub struct CountingLoader<K, V> {
    table: RecordTable<K, V>,
    loads: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<Semaphore>,
    failing: AtomicBool,
}

impl<K: Eq + Hash, V: Clone> CountingLoader<K, V> {
    pub fn new(table: RecordTable<K, V>) -> Self {
        Self {
            table,
            loads: AtomicUsize::new(0),
            delay: None,
            gate: None,
            failing: AtomicBool::new(false),
        }
    }

    /// Loader over a fresh table holding `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = (K, V)>) -> Self {
        let table = RecordTable::new();
        for (id, value) in rows {
            table.insert(id, value);
        }
        Self::new(table)
    }

    /// Sleep this long inside every load.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every load until the gate opens.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1 << 20);
        }
    }

    /// Make loads return a durable-store fault.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn table(&self) -> &RecordTable<K, V> {
        &self.table
    }
}

#[async_trait]
impl<K, V> Loader<K, V> for CountingLoader<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn load(&self, id: &K) -> SeckillResult<Option<V>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // The gate is never closed.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("record-table", "injected load fault").into());
        }
        Ok(self.table.get(id))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for seckill types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_actor_id() -> impl Strategy<Value = ActorId> {
        (1i64..1_000_000).prop_map(ActorId::new)
    }

    pub fn arb_resource_id() -> impl Strategy<Value = ResourceId> {
        (1i64..10_000).prop_map(ResourceId::new)
    }

    /// Small stock counts, so contention tests actually sell out.
    pub fn arb_stock() -> impl Strategy<Value = u32> {
        0u32..50
    }

    /// Lock names in the `namespace:id` shape used by callers.
    pub fn arb_lock_name() -> impl Strategy<Value = String> {
        ("[a-z]{1,8}", 0u32..100_000).prop_map(|(ns, id)| format!("{ns}:{id}"))
    }

    /// Timestamps between 2025-01-01 and 2035-01-01.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_735_689_600i64..2_051_222_400i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// A resource with a window of one minute to one day.
    pub fn arb_flash_sale_resource() -> impl Strategy<Value = FlashSaleResource> {
        (arb_resource_id(), arb_stock(), arb_timestamp(), 60i64..86_400).prop_map(
            |(resource_id, stock, begin_at, length_secs)| FlashSaleResource {
                resource_id,
                stock,
                begin_at,
                end_at: begin_at + chrono::Duration::seconds(length_secs),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use chrono::Duration as ChronoDuration;

    /// Sale that opened ten minutes ago and closes in ten minutes.
    pub fn open_sale(id: i64, stock: u32) -> FlashSaleResource {
        let now = Utc::now();
        FlashSaleResource {
            resource_id: ResourceId::new(id),
            stock,
            begin_at: now - ChronoDuration::minutes(10),
            end_at: now + ChronoDuration::minutes(10),
        }
    }

    /// Sale that opens in an hour.
    pub fn upcoming_sale(id: i64, stock: u32) -> FlashSaleResource {
        let now = Utc::now();
        FlashSaleResource {
            resource_id: ResourceId::new(id),
            stock,
            begin_at: now + ChronoDuration::hours(1),
            end_at: now + ChronoDuration::hours(2),
        }
    }

    /// Sale that closed an hour ago.
    pub fn ended_sale(id: i64, stock: u32) -> FlashSaleResource {
        let now = Utc::now();
        FlashSaleResource {
            resource_id: ResourceId::new(id),
            stock,
            begin_at: now - ChronoDuration::hours(2),
            end_at: now - ChronoDuration::hours(1),
        }
    }

    /// Default configuration with the given order lock scope.
    pub fn config_with_scope(scope: LockScope) -> SeckillConfig {
        let mut config = SeckillConfig::default();
        config.orders.lock_scope = scope;
        config
    }

    /// In-memory KV and durable store sharing one configuration.
    pub struct MemoryStack {
        pub kv: Arc<MemoryKvStore>,
        pub store: Arc<MemorySeckillStore>,
        pub config: SeckillConfig,
    }

    impl MemoryStack {
        pub fn new() -> Self {
            Self::with_config(SeckillConfig::default())
        }

        pub fn with_config(config: SeckillConfig) -> Self {
            Self {
                kv: Arc::new(MemoryKvStore::new()),
                store: Arc::new(MemorySeckillStore::new()),
                config,
            }
        }

        /// Seed resources into the durable store.
        pub fn seed(self, resources: impl IntoIterator<Item = FlashSaleResource>) -> Self {
            for resource in resources {
                self.store.upsert_resource(resource);
            }
            self
        }

        pub fn kv_handle(&self) -> Arc<dyn KvStore> {
            self.kv.clone()
        }
    }

    impl Default for MemoryStack {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for purchase outcomes and stock accounting.

    use super::*;

    #[track_caller]
    pub fn assert_placed(outcome: &OrderOutcome) -> OrderId {
        match outcome {
            OrderOutcome::Placed { order_id } => *order_id,
            other => panic!("Expected Placed, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_rejected(outcome: &OrderOutcome, expected: OrderRejection) {
        assert_eq!(
            outcome.rejection(),
            Some(expected),
            "Expected rejection {:?}, got: {:?}",
            expected,
            outcome
        );
    }

    /// Assert that a result is a store fault.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &SeckillResult<T>) {
        match result {
            Err(SeckillError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Sold units plus remaining stock equal the seeded stock, and every
    /// committed order belongs to a distinct actor.
    #[track_caller]
    pub fn assert_stock_accounted(store: &MemorySeckillStore, resource: ResourceId, seeded: u32) {
        let orders = store.orders_for(resource);
        let remaining = store.stock(resource).unwrap_or_default();
        assert_eq!(
            orders.len() as u64 + u64::from(remaining),
            u64::from(seeded),
            "sold {} + remaining {} != seeded {}",
            orders.len(),
            remaining,
            seeded
        );

        let mut actors: Vec<ActorId> = orders.iter().map(|o| o.actor_id).collect();
        actors.sort();
        actors.dedup();
        assert_eq!(actors.len(), orders.len(), "duplicate order for one actor");
    }
}

// ============================================================================
// TESTS
// ============================================================================
