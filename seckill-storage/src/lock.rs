//! Distributed mutual exclusion over the shared KV store.
//!
//! Acquire is a single set-if-absent with a TTL; release is a server-side
//! compare-and-delete on the holder token. Contention is an ordinary `false`
//! return. Only store faults travel on the `Err` side.

use crate::kv::KvStore;
use chrono::Utc;
use seckill_core::{
    Held, InvariantError, Lease, LeaseData, LeaseToken, LockSettings, SeckillResult,
};
use std::sync::Arc;
use std::time::Duration;

/// Ownership-checked lock keyed by a logical resource name.
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    key_prefix: String,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>, settings: &LockSettings) -> Self {
        Self {
            kv,
            key_prefix: settings.key_prefix.clone(),
        }
    }

    /// Full KV key for a lock name.
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    /// Attempt to take the lock once. Never blocks or retries.
    pub async fn try_acquire(
        &self,
        name: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> SeckillResult<bool> {
        let key = self.lock_key(name);
        let acquired = self
            .kv
            .set_if_absent(&key, &token.to_store_value(), ttl)
            .await?;

        tracing::debug!(lock_key = %key, token = %token, acquired, "lock acquire attempt");
        Ok(acquired)
    }

    /// Release the lock if `token` still holds it; otherwise a no-op.
    ///
    /// Returns false when the record was missing or owned by someone else,
    /// which means our hold already expired.
    pub async fn release(&self, name: &str, token: &LeaseToken) -> SeckillResult<bool> {
        let key = self.lock_key(name);
        let released = self
            .kv
            .compare_and_delete(&key, &token.to_store_value())
            .await?;

        if released {
            tracing::debug!(lock_key = %key, token = %token, "lock released");
        } else {
            let violation = InvariantError::LockNotHeld {
                lock_key: key.clone(),
            };
            tracing::warn!(lock_key = %key, token = %token, error = %violation, "release skipped");
        }
        Ok(released)
    }

    /// Acquire with a freshly generated token, returning a typed lease.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> SeckillResult<Option<Lease<Held>>> {
        let token = LeaseToken::generate();
        let acquired_at = Utc::now();
        if !self.try_acquire(name, &token, ttl).await? {
            return Ok(None);
        }

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| acquired_at.checked_add_signed(d))
            .unwrap_or(acquired_at);

        Ok(Some(Lease::new(LeaseData {
            lock_key: self.lock_key(name),
            token,
            acquired_at,
            expires_at,
        })))
    }

    /// Release a lease obtained from [`DistributedLock::acquire`].
    pub async fn release_lease(&self, lease: Lease<Held>) -> SeckillResult<bool> {
        let data = lease.release();
        let name = data
            .lock_key
            .strip_prefix(self.key_prefix.as_str())
            .unwrap_or(data.lock_key.as_str());
        self.release(name, &data.token).await
    }
}
