//! Seckill Core - Shared Types
//!
//! Identifiers, durable records, lease typestate, outcomes, errors and
//! configuration for the flash-sale subsystem. No I/O lives here; the
//! storage and order crates depend on this one.

pub mod config;
pub mod entities;
pub mod error;
pub mod health;
pub mod identity;
pub mod lock;
pub mod outcome;

pub use config::{
    CacheSettings, IdSettings, LockScope, LockSettings, OrderSettings, SeckillConfig,
    StoreSettings,
};
pub use entities::{FlashSaleResource, Order, SaleWindow};
pub use error::{ConfigError, InvariantError, SeckillError, SeckillResult, StoreError};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use identity::{ActorId, LeaseToken, OrderId, ResourceId, Timestamp};
pub use lock::{Held, Lease, LeaseData, LeaseState};
pub use outcome::{OrderOutcome, OrderRejection, PurchaseStage};
