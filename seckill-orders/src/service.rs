//! Order Placement Service
//!
//! One purchase attempt walks the [`PurchaseStage`] state machine:
//!
//! ```text
//! Received ─ window/stock snapshot ─→ WindowChecked ─ actor lock ─→ Locked
//!   ─ no existing order ─→ Validated ─ conditional decrement ─→ StockReserved
//!   ─ id + insert + commit ─→ Committed
//! ```
//!
//! Two layers are both required:
//! - the per-actor lock serializes one actor's concurrent submissions, so two
//!   of them cannot both pass the existing-order check
//! - the durable store's conditional decrement and `(actor, resource)`
//!   uniqueness keep stock non-negative across actors, lock or no lock
//!
//! The lock is released on every exit path once acquired. If the calling
//! future is dropped mid-flight, the release is spawned from `Drop`; the
//! lock TTL covers crashed holders.

use async_trait::async_trait;
use chrono::Utc;
use seckill_core::{
    ActorId, FlashSaleResource, HealthCheck, HealthReport, LeaseToken, LockScope, Order,
    OrderOutcome, OrderRejection, OrderSettings, PurchaseStage, ResourceId, SaleWindow,
    SeckillConfig, SeckillError, SeckillResult,
};
use seckill_storage::{
    CacheClient, DistributedLock, IdGenerator, InsertOutcome, KvStore, Loader, SeckillStore,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::response::PlacementResponse;

/// Cache key prefix for resource snapshots.
pub const RESOURCE_CACHE_PREFIX: &str = "cache:resource:";

// ============================================================================
// RESOURCE LOADER
// ============================================================================

/// Falls through to the durable store for resource snapshots.
#[derive(Clone)]
pub struct ResourceLoader {
    store: Arc<dyn SeckillStore>,
}

impl ResourceLoader {
    pub fn new(store: Arc<dyn SeckillStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Loader<ResourceId, FlashSaleResource> for ResourceLoader {
    async fn load(&self, id: &ResourceId) -> SeckillResult<Option<FlashSaleResource>> {
        self.store.get_resource(*id).await
    }
}

// ============================================================================
// LOCK GUARD
// ============================================================================

/// An acquired order lock that must be released exactly once.
struct HeldOrderLock {
    lock: DistributedLock,
    name: String,
    token: LeaseToken,
    armed: bool,
}

impl HeldOrderLock {
    fn new(lock: DistributedLock, name: String, token: LeaseToken) -> Self {
        Self {
            lock,
            name,
            token,
            armed: true,
        }
    }

    /// Release now. A failed release is logged; the TTL reclaims the record.
    async fn release(mut self) {
        self.armed = false;
        release_logged(&self.lock, &self.name, &self.token).await;
    }
}

impl Drop for HeldOrderLock {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let lock = self.lock.clone();
        let name = std::mem::take(&mut self.name);
        let token = self.token.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_logged(&lock, &name, &token).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    lock = %name,
                    "no runtime to release abandoned order lock, leaving it to expire"
                );
            }
        }
    }
}

async fn release_logged(lock: &DistributedLock, name: &str, token: &LeaseToken) {
    match lock.release(name, token).await {
        Ok(true) => {}
        // Already logged by the lock: our hold expired before we finished.
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(lock = %name, error = %e, "order lock release failed, leaving it to expire");
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct OrderPlacementService {
    store: Arc<dyn SeckillStore>,
    kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    ids: IdGenerator,
    settings: OrderSettings,
    resource_cache: Option<Arc<CacheClient>>,
    loader: ResourceLoader,
}

impl OrderPlacementService {
    pub fn new(store: Arc<dyn SeckillStore>, kv: Arc<dyn KvStore>, config: &SeckillConfig) -> Self {
        Self {
            lock: DistributedLock::new(kv.clone(), &config.lock),
            ids: IdGenerator::new(kv.clone(), &config.ids),
            settings: config.orders.clone(),
            resource_cache: None,
            loader: ResourceLoader::new(store.clone()),
            store,
            kv,
        }
    }

    /// Read resource snapshots through a pass-through cache instead of the
    /// durable store. The snapshot only drives the early exits; stock
    /// correctness never depends on it.
    pub fn with_resource_cache(mut self, cache: Arc<CacheClient>) -> Self {
        self.resource_cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    /// Lock name for one attempt under the configured scope.
    pub fn lock_name(&self, actor: ActorId, resource: ResourceId) -> String {
        match self.settings.lock_scope {
            LockScope::Actor => format!("{}{}", self.settings.lock_namespace, actor),
            LockScope::ActorResource => {
                format!("{}{}:{}", self.settings.lock_namespace, actor, resource)
            }
        }
    }

    /// Full KV key of the order lock for `(actor, resource)`.
    pub fn lock_key(&self, actor: ActorId, resource: ResourceId) -> String {
        self.lock.lock_key(&self.lock_name(actor, resource))
    }

    /// Run one purchase attempt.
    ///
    /// Contention outcomes come back as `Ok(OrderOutcome::Rejected(_))`.
    /// `Err` means a store fault or a broken invariant; nothing was committed.
    pub async fn place_order(
        &self,
        actor: ActorId,
        resource: ResourceId,
    ) -> SeckillResult<OrderOutcome> {
        let span = tracing::info_span!("place_order", actor = %actor, resource = %resource);
        self.run_attempt(actor, resource).instrument(span).await
    }

    /// [`Self::place_order`] mapped to a client response. Faults are logged here.
    pub async fn place(&self, actor: ActorId, resource: ResourceId) -> PlacementResponse {
        let result = self.place_order(actor, resource).await;
        if let Err(e) = &result {
            match e {
                SeckillError::Store(_) => {
                    tracing::warn!(actor = %actor, resource = %resource, error = %e, "purchase failed on store fault");
                }
                SeckillError::Invariant(_) | SeckillError::Config(_) => {
                    tracing::error!(actor = %actor, resource = %resource, error = %e, "purchase aborted");
                }
            }
        }
        PlacementResponse::from_result(&result)
    }

    async fn run_attempt(
        &self,
        actor: ActorId,
        resource: ResourceId,
    ) -> SeckillResult<OrderOutcome> {
        enter(PurchaseStage::Received);

        let Some(snapshot) = self.fetch_resource(resource).await? else {
            return Ok(reject(OrderRejection::ResourceNotFound));
        };
        match snapshot.window_at(Utc::now()) {
            SaleWindow::NotStarted => return Ok(reject(OrderRejection::NotStarted)),
            SaleWindow::Ended => return Ok(reject(OrderRejection::Ended)),
            SaleWindow::Open => {}
        }
        if !snapshot.appears_in_stock() {
            return Ok(reject(OrderRejection::SoldOut));
        }
        enter(PurchaseStage::WindowChecked);

        let name = self.lock_name(actor, resource);
        let token = LeaseToken::generate();
        if !self
            .lock
            .try_acquire(&name, &token, self.settings.lock_ttl)
            .await?
        {
            return Ok(reject(OrderRejection::AlreadyProcessing));
        }
        let held = HeldOrderLock::new(self.lock.clone(), name, token);
        enter(PurchaseStage::Locked);

        let result = self.place_locked(actor, resource).await;
        held.release().await;
        result
    }

    /// The durable-store-atomic part. Every early return rolls back.
    async fn place_locked(
        &self,
        actor: ActorId,
        resource: ResourceId,
    ) -> SeckillResult<OrderOutcome> {
        let mut tx = self.store.begin().await?;

        if tx.has_order(actor, resource).await? {
            tx.rollback().await?;
            return Ok(reject(OrderRejection::AlreadyOrdered));
        }
        enter(PurchaseStage::Validated);

        if tx.decrement_if_positive(resource).await? == 0 {
            tx.rollback().await?;
            return Ok(reject(OrderRejection::SoldOut));
        }
        enter(PurchaseStage::StockReserved);

        let order = Order {
            order_id: self.ids.next_id(&self.settings.id_namespace).await?,
            actor_id: actor,
            resource_id: resource,
            created_at: Utc::now(),
        };

        match tx.insert_order(&order).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::ConstraintViolation => {
                tx.rollback().await?;
                return Ok(reject(OrderRejection::AlreadyOrdered));
            }
        }
        tx.commit().await?;
        enter(PurchaseStage::Committed);

        tracing::info!(order_id = %order.order_id, "order placed");
        Ok(OrderOutcome::Placed {
            order_id: order.order_id,
        })
    }

    async fn fetch_resource(&self, resource: ResourceId) -> SeckillResult<Option<FlashSaleResource>> {
        match &self.resource_cache {
            Some(cache) => {
                let read = cache
                    .query_with_pass_through(RESOURCE_CACHE_PREFIX, &resource, &self.loader)
                    .await?;
                Ok(read.into_value())
            }
            None => self.loader.load(&resource).await,
        }
    }

    /// Reachability of the KV store, the durable store, and the resource
    /// cache when one is configured.
    pub async fn health(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(3);

        let started = Instant::now();
        let kv = match self.kv.ping().await {
            Ok(()) => HealthCheck::healthy("kv_store"),
            Err(e) => HealthCheck::unhealthy("kv_store", e.to_string()),
        };
        checks.push(
            kv.with_response_time(elapsed_ms(started))
                .with_metadata("backend", self.kv.backend_name().into()),
        );

        let started = Instant::now();
        let durable = match self.store.ping().await {
            Ok(()) => HealthCheck::healthy("durable_store"),
            Err(e) => HealthCheck::unhealthy("durable_store", e.to_string()),
        };
        checks.push(durable.with_response_time(elapsed_ms(started)));

        if let Some(cache) = &self.resource_cache {
            checks.push(cache.health().await);
        }

        HealthReport::from_checks(checks)
    }
}

fn enter(stage: PurchaseStage) {
    tracing::debug!(stage = %stage, "purchase stage");
}

fn reject(rejection: OrderRejection) -> OrderOutcome {
    tracing::info!(code = rejection.code(), "purchase rejected");
    OrderOutcome::Rejected(rejection)
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use seckill_core::{HealthStatus, OrderId};
    use seckill_storage::{MemoryKvStore, MemorySeckillStore};
    use std::collections::HashSet;

    fn open_resource(id: i64, stock: u32) -> FlashSaleResource {
        let now = Utc::now();
        FlashSaleResource {
            resource_id: ResourceId::new(id),
            stock,
            begin_at: now - ChronoDuration::minutes(10),
            end_at: now + ChronoDuration::minutes(10),
        }
    }

    fn service(
        scope: LockScope,
    ) -> (OrderPlacementService, Arc<MemorySeckillStore>, Arc<MemoryKvStore>) {
        let store = Arc::new(MemorySeckillStore::new());
        let kv = Arc::new(MemoryKvStore::new());
        let mut config = SeckillConfig::default();
        config.orders.lock_scope = scope;
        (
            OrderPlacementService::new(store.clone(), kv.clone(), &config),
            store,
            kv,
        )
    }

    #[test]
    fn test_lock_name_follows_scope() {
        let (actor_scoped, _, _) = service(LockScope::Actor);
        assert_eq!(
            actor_scoped.lock_name(ActorId::new(7), ResourceId::new(3)),
            "order:7"
        );
        assert_eq!(
            actor_scoped.lock_key(ActorId::new(7), ResourceId::new(3)),
            "lock:order:7"
        );

        let (pair_scoped, _, _) = service(LockScope::ActorResource);
        assert_eq!(
            pair_scoped.lock_name(ActorId::new(7), ResourceId::new(3)),
            "order:7:3"
        );
    }

    #[tokio::test]
    async fn test_successful_purchase_commits_and_releases_lock() {
        let (svc, store, kv) = service(LockScope::Actor);
        store.upsert_resource(open_resource(1, 2));

        let outcome = svc
            .place_order(ActorId::new(10), ResourceId::new(1))
            .await
            .unwrap();

        let order_id = outcome.order_id().expect("placed");
        assert_eq!(store.stock(ResourceId::new(1)), Some(1));
        assert_eq!(store.order_count(), 1);
        assert_eq!(
            store.orders_for(ResourceId::new(1))[0].order_id,
            order_id
        );
        let parts = svc.id_generator().decompose(order_id);
        assert_eq!(parts.sequence, 1);

        let key = svc.lock_key(ActorId::new(10), ResourceId::new(1));
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_rejected_without_locking() {
        let (svc, _store, kv) = service(LockScope::Actor);
        let outcome = svc
            .place_order(ActorId::new(1), ResourceId::new(404))
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(OrderRejection::ResourceNotFound));
        assert_eq!(kv.live_len(), 0);
    }

    #[tokio::test]
    async fn test_window_rejections() {
        let (svc, store, _kv) = service(LockScope::Actor);
        let now = Utc::now();
        store.upsert_resource(FlashSaleResource {
            resource_id: ResourceId::new(1),
            stock: 5,
            begin_at: now + ChronoDuration::hours(1),
            end_at: now + ChronoDuration::hours(2),
        });
        store.upsert_resource(FlashSaleResource {
            resource_id: ResourceId::new(2),
            stock: 5,
            begin_at: now - ChronoDuration::hours(2),
            end_at: now - ChronoDuration::hours(1),
        });

        let early = svc.place_order(ActorId::new(1), ResourceId::new(1)).await.unwrap();
        let late = svc.place_order(ActorId::new(1), ResourceId::new(2)).await.unwrap();
        assert_eq!(early.rejection(), Some(OrderRejection::NotStarted));
        assert_eq!(late.rejection(), Some(OrderRejection::Ended));
        assert_eq!(store.stock(ResourceId::new(1)), Some(5));
    }

    #[tokio::test]
    async fn test_busy_lock_is_already_processing() {
        let (svc, store, kv) = service(LockScope::Actor);
        store.upsert_resource(open_resource(1, 5));
        let key = svc.lock_key(ActorId::new(9), ResourceId::new(1));
        kv.set(&key, "someone-else", Some(std::time::Duration::from_secs(5)))
            .await
            .unwrap();

        let outcome = svc.place_order(ActorId::new(9), ResourceId::new(1)).await.unwrap();
        assert_eq!(outcome.rejection(), Some(OrderRejection::AlreadyProcessing));
        // The foreign holder keeps its lock.
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("someone-else"));
        assert_eq!(store.stock(ResourceId::new(1)), Some(5));
    }

    #[tokio::test]
    async fn test_second_purchase_by_same_actor_is_already_ordered() {
        let (svc, store, kv) = service(LockScope::Actor);
        store.upsert_resource(open_resource(1, 5));

        let first = svc.place_order(ActorId::new(3), ResourceId::new(1)).await.unwrap();
        let second = svc.place_order(ActorId::new(3), ResourceId::new(1)).await.unwrap();
        assert!(first.is_placed());
        assert_eq!(second.rejection(), Some(OrderRejection::AlreadyOrdered));
        assert_eq!(store.stock(ResourceId::new(1)), Some(4));

        let key = svc.lock_key(ActorId::new(3), ResourceId::new(1));
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_fault_surfaces_as_error_and_releases_lock() {
        let (svc, store, kv) = service(LockScope::Actor);
        store.upsert_resource(open_resource(1, 5));
        let cache_kv: Arc<dyn KvStore> = kv.clone();
        let cache = Arc::new(CacheClient::new(
            cache_kv.clone(),
            DistributedLock::new(cache_kv, &Default::default()),
            &Default::default(),
        ));
        let svc = svc.with_resource_cache(cache);

        // Warm the snapshot so the fault hits inside the lock.
        let warm = svc.place(ActorId::new(1), ResourceId::new(1)).await;
        assert!(warm.success);

        store.set_offline(true);
        let response = svc.place(ActorId::new(2), ResourceId::new(1)).await;
        assert!(!response.success);
        assert!(response.retryable);

        let key = svc.lock_key(ActorId::new(2), ResourceId::new(1));
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_placed_ids_are_distinct() {
        let (svc, store, _kv) = service(LockScope::Actor);
        store.upsert_resource(open_resource(1, 3));
        let mut ids: HashSet<OrderId> = HashSet::new();
        for actor in 1..=3 {
            let outcome = svc.place_order(ActorId::new(actor), ResourceId::new(1)).await.unwrap();
            ids.insert(outcome.order_id().expect("placed"));
        }
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_health_reports_both_stores() {
        let (svc, store, _kv) = service(LockScope::Actor);
        let report = svc.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.component("kv_store").is_some());

        store.set_offline(true);
        let report = svc.health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.component("durable_store").unwrap().is_healthy());
    }
}
