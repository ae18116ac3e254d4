//! Configuration types
//!
//! Every section has defaults matching the production settings and can be
//! overridden from `SECKILL_*` environment variables. Unparseable values
//! fall back to the default; `validate()` catches values that parse but make
//! no sense.

use crate::{ConfigError, SeckillError, SeckillResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// TTL for a cached value written by the pass-through strategy (30 minutes).
pub const DEFAULT_CACHE_ENTRY_TTL_SECS: u64 = 30 * 60;

/// TTL for the absence sentinel (2 minutes).
pub const DEFAULT_CACHE_NULL_TTL_SECS: u64 = 2 * 60;

/// Logical expiry window for hot keys (20 seconds).
pub const DEFAULT_CACHE_LOGICAL_WINDOW_SECS: u64 = 20;

/// TTL of the per-key rebuild lock (10 seconds).
pub const DEFAULT_CACHE_REBUILD_LOCK_TTL_SECS: u64 = 10;

/// Number of background rebuild workers.
pub const DEFAULT_CACHE_REBUILD_WORKERS: usize = 10;

/// Rebuild jobs that may wait for a worker before new ones are dropped.
pub const DEFAULT_CACHE_REBUILD_QUEUE_CAPACITY: usize = 64;

/// Sleep between attempts when another caller holds the mutex-rebuild lock.
pub const DEFAULT_CACHE_MUTEX_RETRY_DELAY_MS: u64 = 50;

/// Attempts before a mutex-rebuild read gives up waiting and loads directly.
pub const DEFAULT_CACHE_MUTEX_MAX_ATTEMPTS: u32 = 20;

/// Epoch anchor for composite ids: 2025-01-01T00:00:00Z.
pub const DEFAULT_ID_EPOCH_ANCHOR_SECS: i64 = 1_735_689_600;

/// Low-order bits reserved for the daily sequence.
pub const DEFAULT_ID_SEQUENCE_BITS: u32 = 32;

/// Widest sequence half that still leaves 32 bits of seconds for the
/// timestamp half.
pub const MAX_ID_SEQUENCE_BITS: u32 = 32;

/// Per-call bound on store round trips.
pub const DEFAULT_STORE_OP_TIMEOUT_MS: u64 = 500;

/// Order lock TTL; must exceed the critical section with margin.
pub const DEFAULT_ORDER_LOCK_TTL_SECS: u64 = 5;

// ============================================================================
// SECTIONS
// ============================================================================

/// Cache Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub entry_ttl: Duration,
    pub null_ttl: Duration,
    pub logical_window: Duration,
    /// Namespace for per-key rebuild locks, e.g. `rebuild:` gives
    /// `lock:rebuild:<cache key>`.
    pub rebuild_lock_namespace: String,
    pub rebuild_lock_ttl: Duration,
    pub rebuild_workers: usize,
    pub rebuild_queue_capacity: usize,
    pub mutex_retry_delay: Duration,
    pub mutex_max_attempts: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(DEFAULT_CACHE_ENTRY_TTL_SECS),
            null_ttl: Duration::from_secs(DEFAULT_CACHE_NULL_TTL_SECS),
            logical_window: Duration::from_secs(DEFAULT_CACHE_LOGICAL_WINDOW_SECS),
            rebuild_lock_namespace: "rebuild:".to_string(),
            rebuild_lock_ttl: Duration::from_secs(DEFAULT_CACHE_REBUILD_LOCK_TTL_SECS),
            rebuild_workers: DEFAULT_CACHE_REBUILD_WORKERS,
            rebuild_queue_capacity: DEFAULT_CACHE_REBUILD_QUEUE_CAPACITY,
            mutex_retry_delay: Duration::from_millis(DEFAULT_CACHE_MUTEX_RETRY_DELAY_MS),
            mutex_max_attempts: DEFAULT_CACHE_MUTEX_MAX_ATTEMPTS,
        }
    }
}

impl CacheSettings {
    /// Environment variables:
    /// - `SECKILL_CACHE_ENTRY_TTL_SECS` (default: 1800)
    /// - `SECKILL_CACHE_NULL_TTL_SECS` (default: 120)
    /// - `SECKILL_CACHE_LOGICAL_WINDOW_SECS` (default: 20)
    /// - `SECKILL_CACHE_REBUILD_LOCK_TTL_SECS` (default: 10)
    /// - `SECKILL_CACHE_REBUILD_WORKERS` (default: 10)
    /// - `SECKILL_CACHE_REBUILD_QUEUE_CAPACITY` (default: 64)
    /// - `SECKILL_CACHE_MUTEX_RETRY_DELAY_MS` (default: 50)
    /// - `SECKILL_CACHE_MUTEX_MAX_ATTEMPTS` (default: 20)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            entry_ttl: env_secs("SECKILL_CACHE_ENTRY_TTL_SECS", defaults.entry_ttl),
            null_ttl: env_secs("SECKILL_CACHE_NULL_TTL_SECS", defaults.null_ttl),
            logical_window: env_secs("SECKILL_CACHE_LOGICAL_WINDOW_SECS", defaults.logical_window),
            rebuild_lock_namespace: env_string(
                "SECKILL_CACHE_REBUILD_LOCK_NAMESPACE",
                defaults.rebuild_lock_namespace,
            ),
            rebuild_lock_ttl: env_secs(
                "SECKILL_CACHE_REBUILD_LOCK_TTL_SECS",
                defaults.rebuild_lock_ttl,
            ),
            rebuild_workers: env_parse("SECKILL_CACHE_REBUILD_WORKERS", defaults.rebuild_workers),
            rebuild_queue_capacity: env_parse(
                "SECKILL_CACHE_REBUILD_QUEUE_CAPACITY",
                defaults.rebuild_queue_capacity,
            ),
            mutex_retry_delay: env_millis(
                "SECKILL_CACHE_MUTEX_RETRY_DELAY_MS",
                defaults.mutex_retry_delay,
            ),
            mutex_max_attempts: env_parse(
                "SECKILL_CACHE_MUTEX_MAX_ATTEMPTS",
                defaults.mutex_max_attempts,
            ),
        }
    }

    fn validate(&self) -> SeckillResult<()> {
        require_positive("cache.entry_ttl", self.entry_ttl)?;
        require_positive("cache.null_ttl", self.null_ttl)?;
        require_positive("cache.logical_window", self.logical_window)?;
        require_positive("cache.rebuild_lock_ttl", self.rebuild_lock_ttl)?;

        if self.null_ttl > self.entry_ttl {
            return Err(invalid(
                "cache.null_ttl",
                format!("{:?}", self.null_ttl),
                "null_ttl must not exceed entry_ttl",
            ));
        }
        if self.rebuild_workers == 0 {
            return Err(invalid(
                "cache.rebuild_workers",
                "0".to_string(),
                "at least one rebuild worker is required",
            ));
        }
        if self.rebuild_queue_capacity == 0 {
            return Err(invalid(
                "cache.rebuild_queue_capacity",
                "0".to_string(),
                "rebuild_queue_capacity must be greater than 0",
            ));
        }
        if self.mutex_max_attempts == 0 {
            return Err(invalid(
                "cache.mutex_max_attempts",
                "0".to_string(),
                "mutex_max_attempts must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Distributed Lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Prefix for every lock record, e.g. `lock:`.
    pub key_prefix: String,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
        }
    }
}

impl LockSettings {
    /// Environment variables:
    /// - `SECKILL_LOCK_KEY_PREFIX` (default: `lock:`)
    pub fn from_env() -> Self {
        Self {
            key_prefix: env_string("SECKILL_LOCK_KEY_PREFIX", Self::default().key_prefix),
        }
    }
}

/// Id Generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdSettings {
    /// Prefix for daily sequence keys, e.g. `icr:`.
    pub key_prefix: String,
    pub epoch_anchor_secs: i64,
    pub sequence_bits: u32,
}

impl Default for IdSettings {
    fn default() -> Self {
        Self {
            key_prefix: "icr:".to_string(),
            epoch_anchor_secs: DEFAULT_ID_EPOCH_ANCHOR_SECS,
            sequence_bits: DEFAULT_ID_SEQUENCE_BITS,
        }
    }
}

impl IdSettings {
    /// Environment variables:
    /// - `SECKILL_ID_KEY_PREFIX` (default: `icr:`)
    /// - `SECKILL_ID_EPOCH_ANCHOR_SECS` (default: 1735689600)
    /// - `SECKILL_ID_SEQUENCE_BITS` (default: 32)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_prefix: env_string("SECKILL_ID_KEY_PREFIX", defaults.key_prefix),
            epoch_anchor_secs: env_parse("SECKILL_ID_EPOCH_ANCHOR_SECS", defaults.epoch_anchor_secs),
            sequence_bits: env_parse("SECKILL_ID_SEQUENCE_BITS", defaults.sequence_bits),
        }
    }

    fn validate(&self) -> SeckillResult<()> {
        if !(16..=MAX_ID_SEQUENCE_BITS).contains(&self.sequence_bits) {
            return Err(invalid(
                "ids.sequence_bits",
                self.sequence_bits.to_string(),
                "sequence_bits must be between 16 and 32",
            ));
        }
        if self.epoch_anchor_secs < 0 {
            return Err(invalid(
                "ids.epoch_anchor_secs",
                self.epoch_anchor_secs.to_string(),
                "epoch_anchor_secs must be non-negative",
            ));
        }
        Ok(())
    }
}

/// KV store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub redis_url: String,
    pub pool_size: usize,
    /// Bound on every store round trip. Elapsing counts as unavailability.
    pub op_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            op_timeout: Duration::from_millis(DEFAULT_STORE_OP_TIMEOUT_MS),
        }
    }
}

impl StoreSettings {
    /// Environment variables:
    /// - `SECKILL_REDIS_URL` (default: `redis://127.0.0.1:6379`)
    /// - `SECKILL_REDIS_POOL_SIZE` (default: 16)
    /// - `SECKILL_STORE_OP_TIMEOUT_MS` (default: 500)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_string("SECKILL_REDIS_URL", defaults.redis_url),
            pool_size: env_parse("SECKILL_REDIS_POOL_SIZE", defaults.pool_size),
            op_timeout: env_millis("SECKILL_STORE_OP_TIMEOUT_MS", defaults.op_timeout),
        }
    }

    fn validate(&self) -> SeckillResult<()> {
        if self.redis_url.trim().is_empty() {
            return Err(SeckillError::Config(ConfigError::MissingRequired {
                field: "store.redis_url".to_string(),
            }));
        }
        if self.pool_size == 0 {
            return Err(invalid(
                "store.pool_size",
                "0".to_string(),
                "pool_size must be greater than 0",
            ));
        }
        require_positive("store.op_timeout", self.op_timeout)
    }
}

/// Granularity of the order lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LockScope {
    /// One lock per actor: serializes all of an actor's purchases.
    #[default]
    Actor,
    /// One lock per `(actor, resource)`: different resources proceed in parallel.
    ActorResource,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Actor => "actor",
            LockScope::ActorResource => "actor_resource",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "actor" => Ok(LockScope::Actor),
            "actor_resource" | "actor-resource" => Ok(LockScope::ActorResource),
            _ => Err(ConfigError::InvalidValue {
                field: "orders.lock_scope".to_string(),
                value: s.to_string(),
                reason: "expected `actor` or `actor_resource`".to_string(),
            }),
        }
    }
}

/// Order Placement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSettings {
    /// Lock name namespace, e.g. `order:` gives `lock:order:<actor>`.
    pub lock_namespace: String,
    pub lock_ttl: Duration,
    pub lock_scope: LockScope,
    /// Namespace passed to the id generator.
    pub id_namespace: String,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            lock_namespace: "order:".to_string(),
            lock_ttl: Duration::from_secs(DEFAULT_ORDER_LOCK_TTL_SECS),
            lock_scope: LockScope::Actor,
            id_namespace: "order".to_string(),
        }
    }
}

impl OrderSettings {
    /// Environment variables:
    /// - `SECKILL_ORDER_LOCK_NAMESPACE` (default: `order:`)
    /// - `SECKILL_ORDER_LOCK_TTL_SECS` (default: 5)
    /// - `SECKILL_ORDER_LOCK_SCOPE` (`actor` | `actor_resource`, default: `actor`)
    /// - `SECKILL_ORDER_ID_NAMESPACE` (default: `order`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lock_namespace: env_string("SECKILL_ORDER_LOCK_NAMESPACE", defaults.lock_namespace),
            lock_ttl: env_secs("SECKILL_ORDER_LOCK_TTL_SECS", defaults.lock_ttl),
            lock_scope: env_parse("SECKILL_ORDER_LOCK_SCOPE", defaults.lock_scope),
            id_namespace: env_string("SECKILL_ORDER_ID_NAMESPACE", defaults.id_namespace),
        }
    }

    fn validate(&self) -> SeckillResult<()> {
        require_positive("orders.lock_ttl", self.lock_ttl)?;
        if self.id_namespace.trim().is_empty() {
            return Err(SeckillError::Config(ConfigError::MissingRequired {
                field: "orders.id_namespace".to_string(),
            }));
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SeckillConfig {
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub ids: IdSettings,
    pub store: StoreSettings,
    pub orders: OrderSettings,
}

impl SeckillConfig {
    /// Load every section from the environment.
    pub fn from_env() -> Self {
        Self {
            cache: CacheSettings::from_env(),
            lock: LockSettings::from_env(),
            ids: IdSettings::from_env(),
            store: StoreSettings::from_env(),
            orders: OrderSettings::from_env(),
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(SeckillError::Config) if invalid.
    pub fn validate(&self) -> SeckillResult<()> {
        self.cache.validate()?;
        self.ids.validate()?;
        self.store.validate()?;
        self.orders.validate()?;
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn invalid(field: &str, value: String, reason: &str) -> SeckillError {
    SeckillError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

fn require_positive(field: &str, value: Duration) -> SeckillResult<()> {
    if value.is_zero() {
        return Err(invalid(
            field,
            format!("{:?}", value),
            &format!("{} must be positive", field),
        ));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
