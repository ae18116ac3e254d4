//! End-to-end purchase behavior under contention, faults and cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seckill_core::{FlashSaleResource, LockScope, OrderRejection, SeckillResult};
use seckill_orders::{OrderPlacementService, PlacementCode};
use seckill_storage::{
    CacheClient, DistributedLock, KvStore, MemorySeckillStore, OrderTransaction, SeckillStore,
};
use seckill_test_utils::assertions::{
    assert_placed, assert_rejected, assert_stock_accounted, assert_store_error,
};
use seckill_test_utils::fixtures::{self, MemoryStack};
use seckill_test_utils::{ActorId, FlakyKvStore, OrderOutcome, ResourceId};
use tokio::task::JoinSet;

fn service_for(stack: &MemoryStack) -> Arc<OrderPlacementService> {
    Arc::new(OrderPlacementService::new(
        stack.store.clone(),
        stack.kv_handle(),
        &stack.config,
    ))
}

async fn run_concurrently(
    service: &Arc<OrderPlacementService>,
    requests: impl IntoIterator<Item = (ActorId, ResourceId)>,
) -> Vec<OrderOutcome> {
    let mut tasks = JoinSet::new();
    for (actor, resource) in requests {
        let service = service.clone();
        tasks.spawn(async move { service.place_order(actor, resource).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.unwrap().unwrap());
    }
    outcomes
}

async fn assert_no_lock_left(
    kv: &dyn KvStore,
    service: &OrderPlacementService,
    actors: impl IntoIterator<Item = ActorId>,
    resource: ResourceId,
) {
    for actor in actors {
        let key = service.lock_key(actor, resource);
        assert_eq!(kv.get(&key).await.unwrap(), None, "{key} still held");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_buyers_never_oversell() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 10)]);
    let service = service_for(&stack);
    let resource = ResourceId::new(1);

    let outcomes =
        run_concurrently(&service, (1..=50).map(|a| (ActorId::new(a), resource))).await;

    let placed = outcomes.iter().filter(|o| o.is_placed()).count();
    let sold_out = outcomes
        .iter()
        .filter(|o| o.rejection() == Some(OrderRejection::SoldOut))
        .count();
    assert_eq!(placed, 10);
    assert_eq!(sold_out, 40);
    assert_eq!(stack.store.stock(resource), Some(0));
    assert_stock_accounted(&stack.store, resource, 10);
    assert_no_lock_left(stack.kv.as_ref(), &service, (1..=50).map(ActorId::new), resource).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_one_actor_concurrent_attempts_place_at_most_one_order() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 100)]);
    let service = service_for(&stack);
    let actor = ActorId::new(42);
    let resource = ResourceId::new(1);

    let outcomes = run_concurrently(&service, (0..20).map(|_| (actor, resource))).await;

    let placed = outcomes.iter().filter(|o| o.is_placed()).count();
    assert_eq!(placed, 1);
    for outcome in outcomes.iter().filter(|o| !o.is_placed()) {
        assert!(
            matches!(
                outcome.rejection(),
                Some(OrderRejection::AlreadyOrdered | OrderRejection::AlreadyProcessing)
            ),
            "unexpected outcome {outcome:?}"
        );
    }
    assert_eq!(stack.store.stock(resource), Some(99));
    assert_no_lock_left(stack.kv.as_ref(), &service, [actor], resource).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_of_two_actors() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 1)]);
    let service = service_for(&stack);
    let resource = ResourceId::new(1);
    let a = ActorId::new(1);
    let b = ActorId::new(2);

    let (first, second) = tokio::join!(
        service.place_order(a, resource),
        service.place_order(b, resource)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let winner = match (first.is_placed(), second.is_placed()) {
        (true, false) => {
            assert_rejected(&second, OrderRejection::SoldOut);
            a
        }
        (false, true) => {
            assert_rejected(&first, OrderRejection::SoldOut);
            b
        }
        other => panic!("expected exactly one winner, got {other:?}"),
    };

    let again = service.place_order(winner, resource).await.unwrap();
    assert_rejected(&again, OrderRejection::AlreadyOrdered);
    assert_eq!(stack.store.stock(resource), Some(0));
}

#[tokio::test]
async fn test_window_and_existence_rejections() {
    let stack = MemoryStack::new().seed([
        fixtures::upcoming_sale(1, 5),
        fixtures::ended_sale(2, 5),
        fixtures::open_sale(3, 0),
    ]);
    let service = service_for(&stack);
    let actor = ActorId::new(1);

    let cases = [
        (1, PlacementCode::SaleNotStarted),
        (2, PlacementCode::SaleEnded),
        (3, PlacementCode::SoldOut),
        (4, PlacementCode::ResourceNotFound),
    ];
    for (resource, expected) in cases {
        let response = service.place(actor, ResourceId::new(resource)).await;
        assert_eq!(response.code, expected);
        assert!(!response.retryable);
    }
    assert_eq!(stack.store.order_count(), 0);
}

#[tokio::test]
async fn test_kv_outage_is_retryable_service_unavailable() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 5)]);
    let flaky = Arc::new(FlakyKvStore::new(stack.kv_handle()));
    let service = OrderPlacementService::new(stack.store.clone(), flaky.clone(), &stack.config);

    flaky.fail_writes(true);
    assert_store_error(&service.place_order(ActorId::new(1), ResourceId::new(1)).await);
    let response = service.place(ActorId::new(1), ResourceId::new(1)).await;
    assert!(!response.success);
    assert_eq!(response.code, PlacementCode::ServiceUnavailable);
    assert!(response.retryable);
    assert_eq!(stack.store.stock(ResourceId::new(1)), Some(5));

    flaky.fail_writes(false);
    let response = service.place(ActorId::new(1), ResourceId::new(1)).await;
    assert!(response.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_actor_resource_scope_lets_one_actor_buy_different_resources_in_parallel() {
    let stack = MemoryStack::with_config(fixtures::config_with_scope(LockScope::ActorResource))
        .seed([fixtures::open_sale(1, 5), fixtures::open_sale(2, 5)]);
    let service = service_for(&stack);
    let actor = ActorId::new(7);

    let outcomes = run_concurrently(
        &service,
        [(actor, ResourceId::new(1)), (actor, ResourceId::new(2))],
    )
    .await;

    for outcome in &outcomes {
        assert_placed(outcome);
    }
    assert_eq!(stack.store.order_count(), 2);
}

#[tokio::test]
async fn test_resource_snapshot_comes_from_cache_after_first_read() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 10)]);
    let kv = stack.kv_handle();
    let cache = Arc::new(CacheClient::new(
        kv.clone(),
        DistributedLock::new(kv.clone(), &stack.config.lock),
        &stack.config.cache,
    ));
    let service = OrderPlacementService::new(stack.store.clone(), kv, &stack.config)
        .with_resource_cache(cache.clone());

    for actor in 1..=5 {
        let outcome = service
            .place_order(ActorId::new(actor), ResourceId::new(1))
            .await
            .unwrap();
        assert_placed(&outcome);
    }

    let stats = cache.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 4);
    // The snapshot is stale but the durable store is exact.
    assert_eq!(stack.store.stock(ResourceId::new(1)), Some(5));
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Durable store whose `begin` stalls, so a caller can abandon the attempt
/// while the order lock is held.
struct StallingStore {
    inner: Arc<MemorySeckillStore>,
    stall: Duration,
}

#[async_trait]
impl SeckillStore for StallingStore {
    async fn get_resource(&self, id: ResourceId) -> SeckillResult<Option<FlashSaleResource>> {
        self.inner.get_resource(id).await
    }

    async fn begin(&self) -> SeckillResult<Box<dyn OrderTransaction>> {
        tokio::time::sleep(self.stall).await;
        self.inner.begin().await
    }

    async fn ping(&self) -> SeckillResult<()> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn test_abandoned_attempt_still_releases_lock() {
    let stack = MemoryStack::new().seed([fixtures::open_sale(1, 5)]);
    let store = Arc::new(StallingStore {
        inner: stack.store.clone(),
        stall: Duration::from_millis(500),
    });
    let service = OrderPlacementService::new(store, stack.kv_handle(), &stack.config);
    let actor = ActorId::new(1);
    let resource = ResourceId::new(1);
    let key = service.lock_key(actor, resource);

    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        service.place_order(actor, resource),
    )
    .await;
    assert!(attempt.is_err(), "attempt should have been abandoned");

    // The spawned release needs a moment to run.
    let mut released = false;
    for _ in 0..50 {
        if stack.kv.get(&key).await.unwrap().is_none() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "{key} still held after abandonment");
    assert_eq!(stack.store.stock(ResourceId::new(1)), Some(5));
}
