//! Flash-sale simulator.
//!
//! Seeds one resource with `SECKILL_SIM_STOCK` units, then fires
//! `SECKILL_SIM_ACTORS * SECKILL_SIM_ATTEMPTS` concurrent purchases and
//! prints the outcome tally as JSON.
//!
//! Usage:
//!   cargo run -p seckill-orders --bin seckill-sim
//!   SECKILL_SIM_BACKEND=redis SECKILL_REDIS_URL=redis://127.0.0.1:6379 cargo run -p seckill-orders --bin seckill-sim

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use seckill_core::{ActorId, FlashSaleResource, ResourceId, SeckillConfig};
use seckill_orders::{init_tracing, OrderPlacementService, PlacementCode, TelemetryConfig};
use seckill_storage::{
    CacheClient, DistributedLock, KvStore, MemoryKvStore, MemorySeckillStore, RedisKvStore,
};
use tokio::task::JoinSet;

type SimResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

struct SimParams {
    stock: u32,
    actors: i64,
    attempts_per_actor: u32,
    backend: String,
}

impl SimParams {
    fn from_env() -> Self {
        Self {
            stock: env_or("SECKILL_SIM_STOCK", 100),
            actors: env_or("SECKILL_SIM_ACTORS", 500),
            attempts_per_actor: env_or("SECKILL_SIM_ATTEMPTS", 2),
            backend: std::env::var("SECKILL_SIM_BACKEND").unwrap_or_else(|_| "memory".to_string()),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> SimResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let params = SimParams::from_env();
    let config = SeckillConfig::from_env();
    config.validate()?;

    let kv: Arc<dyn KvStore> = match params.backend.as_str() {
        "redis" => Arc::new(RedisKvStore::from_settings(&config.store)?),
        _ => Arc::new(MemoryKvStore::new()),
    };
    kv.ping().await?;

    let store = Arc::new(MemorySeckillStore::new());
    let resource_id = ResourceId::new(1);
    let now = Utc::now();
    store.upsert_resource(FlashSaleResource {
        resource_id,
        stock: params.stock,
        begin_at: now - ChronoDuration::seconds(1),
        end_at: now + ChronoDuration::minutes(10),
    });

    let cache = Arc::new(CacheClient::new(
        kv.clone(),
        DistributedLock::new(kv.clone(), &config.lock),
        &config.cache,
    ));
    let service = Arc::new(
        OrderPlacementService::new(store.clone(), kv.clone(), &config)
            .with_resource_cache(cache.clone()),
    );

    tracing::info!(
        backend = %params.backend,
        stock = params.stock,
        actors = params.actors,
        attempts_per_actor = params.attempts_per_actor,
        lock_scope = %config.orders.lock_scope,
        "Starting flash sale"
    );

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for actor in 1..=params.actors {
        for _ in 0..params.attempts_per_actor {
            let service = service.clone();
            tasks.spawn(async move { service.place(ActorId::new(actor), resource_id).await });
        }
    }

    let mut tally: BTreeMap<String, u64> = BTreeMap::new();
    let mut placed = 0u64;
    while let Some(joined) = tasks.join_next().await {
        let response = joined?;
        if response.code == PlacementCode::Placed {
            placed += 1;
        }
        *tally.entry(response.code.to_string()).or_default() += 1;
    }
    let elapsed = started.elapsed();

    let remaining = store.stock(resource_id).unwrap_or_default();
    let orders = store.orders_for(resource_id).len();
    if placed + u64::from(remaining) != u64::from(params.stock) || orders as u64 != placed {
        tracing::error!(placed, remaining, orders, "stock accounting mismatch");
    }

    let summary = serde_json::json!({
        "elapsed_ms": elapsed.as_millis() as u64,
        "stock_seeded": params.stock,
        "stock_remaining": remaining,
        "orders": orders,
        "outcomes": tally,
        "cache": cache.stats(),
        "health": service.health().await,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    cache.rebuild_pool().shutdown().await;
    Ok(())
}
