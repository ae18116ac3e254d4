//! Durable-store interfaces used by order placement.
//!
//! The durable store owns resources and orders. Two of its guarantees carry
//! correctness on their own, independent of any lock: the stock decrement is
//! a single conditional row update, and `(actor, resource)` is unique.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use seckill_core::{ActorId, FlashSaleResource, Order, ResourceId, SeckillResult, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of inserting an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The `(actor, resource)` uniqueness constraint rejected the row.
    ConstraintViolation,
}

#[async_trait]
pub trait SeckillStore: Send + Sync {
    /// Canonical resource record, or `None` when it does not exist.
    async fn get_resource(&self, id: ResourceId) -> SeckillResult<Option<FlashSaleResource>>;

    /// Open a unit of work. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> SeckillResult<Box<dyn OrderTransaction>>;

    async fn ping(&self) -> SeckillResult<()>;
}

/// The all-or-nothing part of a purchase.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn has_order(&mut self, actor: ActorId, resource: ResourceId) -> SeckillResult<bool>;

    /// `UPDATE ... SET stock = stock - 1 WHERE id = ? AND stock > 0`.
    /// Returns the affected row count, 0 or 1.
    async fn decrement_if_positive(&mut self, resource: ResourceId) -> SeckillResult<u64>;

    async fn insert_order(&mut self, order: &Order) -> SeckillResult<InsertOutcome>;

    async fn commit(self: Box<Self>) -> SeckillResult<()>;

    async fn rollback(self: Box<Self>) -> SeckillResult<()>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

const BACKEND: &str = "memory-durable";

#[derive(Debug, Default)]
struct Tables {
    resources: DashMap<ResourceId, FlashSaleResource>,
    orders: DashMap<(ActorId, ResourceId), Order>,
    offline: AtomicBool,
}

impl Tables {
    fn check_online(&self) -> SeckillResult<()> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StoreError::unavailable(BACKEND, "store is offline").into());
        }
        Ok(())
    }
}

/// DashMap-backed [`SeckillStore`].
///
/// Row operations are atomic per key. Transactions keep an undo log rather
/// than isolating writes, so other callers may observe uncommitted rows;
/// stock can never go negative and duplicate orders can never be inserted
/// regardless.
#[derive(Debug, Clone, Default)]
pub struct MemorySeckillStore {
    tables: Arc<Tables>,
}

impl MemorySeckillStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource row.
    pub fn upsert_resource(&self, resource: FlashSaleResource) {
        self.tables.resources.insert(resource.resource_id, resource);
    }

    pub fn stock(&self, id: ResourceId) -> Option<u32> {
        self.tables.resources.get(&id).map(|r| r.stock)
    }

    pub fn order_count(&self) -> usize {
        self.tables.orders.len()
    }

    pub fn orders_for(&self, resource: ResourceId) -> Vec<Order> {
        self.tables
            .orders
            .iter()
            .filter(|o| o.resource_id == resource)
            .map(|o| o.value().clone())
            .collect()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.tables.offline.store(offline, Ordering::Release);
    }
}

#[async_trait]
impl SeckillStore for MemorySeckillStore {
    async fn get_resource(&self, id: ResourceId) -> SeckillResult<Option<FlashSaleResource>> {
        self.tables.check_online()?;
        Ok(self.tables.resources.get(&id).map(|r| r.value().clone()))
    }

    async fn begin(&self) -> SeckillResult<Box<dyn OrderTransaction>> {
        self.tables.check_online()?;
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            undo: Vec::new(),
            finished: false,
        }))
    }

    async fn ping(&self) -> SeckillResult<()> {
        self.tables.check_online()
    }
}

#[derive(Debug)]
enum Undo {
    RestoreStock(ResourceId),
    RemoveOrder(ActorId, ResourceId),
}

struct MemoryTransaction {
    tables: Arc<Tables>,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryTransaction {
    fn apply_undo(&mut self) {
        for step in self.undo.drain(..).rev() {
            match step {
                Undo::RestoreStock(id) => {
                    if let Some(mut row) = self.tables.resources.get_mut(&id) {
                        row.stock = row.stock.saturating_add(1);
                    }
                }
                Undo::RemoveOrder(actor, resource) => {
                    self.tables.orders.remove(&(actor, resource));
                }
            }
        }
        self.finished = true;
    }
}

#[async_trait]
impl OrderTransaction for MemoryTransaction {
    async fn has_order(&mut self, actor: ActorId, resource: ResourceId) -> SeckillResult<bool> {
        self.tables.check_online()?;
        Ok(self.tables.orders.contains_key(&(actor, resource)))
    }

    async fn decrement_if_positive(&mut self, resource: ResourceId) -> SeckillResult<u64> {
        self.tables.check_online()?;
        let Some(mut row) = self.tables.resources.get_mut(&resource) else {
            return Ok(0);
        };
        if row.stock == 0 {
            return Ok(0);
        }
        row.stock -= 1;
        drop(row);
        self.undo.push(Undo::RestoreStock(resource));
        Ok(1)
    }

    async fn insert_order(&mut self, order: &Order) -> SeckillResult<InsertOutcome> {
        self.tables.check_online()?;
        match self.tables.orders.entry((order.actor_id, order.resource_id)) {
            Entry::Occupied(_) => Ok(InsertOutcome::ConstraintViolation),
            Entry::Vacant(vacant) => {
                vacant.insert(order.clone());
                self.undo
                    .push(Undo::RemoveOrder(order.actor_id, order.resource_id));
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> SeckillResult<()> {
        if let Err(e) = self.tables.check_online() {
            self.apply_undo();
            return Err(e);
        }
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> SeckillResult<()> {
        self.apply_undo();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.undo.is_empty() {
            tracing::warn!(steps = self.undo.len(), "transaction dropped without commit; rolling back");
            self.apply_undo();
        }
    }
}
