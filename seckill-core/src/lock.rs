//! Lease typestate for compile-time safety of lock lifecycle.
//!
//! A `Lease<Held>` only comes into existence when the KV store accepted a
//! set-if-absent for its key, and releasing it consumes the value, so a
//! lease cannot be released twice through the same handle.
//!
//! # State Transition Diagram
//!
//! ```text
//! (absent) ─── try_acquire() ──→ Held ─── release() ──→ (absent)
//!                                  │
//!                          ttl elapses ──→ (absent, reclaimed by the store)
//! ```

use crate::{LeaseToken, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

// ============================================================================
// LEASE DATA (state-independent)
// ============================================================================

/// What a lock record in the KV store represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    /// Fully-prefixed KV key, e.g. `lock:order:42`.
    pub lock_key: String,
    /// Token written as the record's value.
    pub token: LeaseToken,
    pub acquired_at: Timestamp,
    /// Client-side estimate of when the store will reclaim the record.
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// The store accepted our token for this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
}

// ============================================================================
// LEASE WRAPPER
// ============================================================================

/// A lock lease with compile-time state tracking.
#[derive(Debug)]
pub struct Lease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> Lease<S> {
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn lock_key(&self) -> &str {
        &self.data.lock_key
    }

    pub fn token(&self) -> &LeaseToken {
        &self.data.token
    }

    pub fn acquired_at(&self) -> Timestamp {
        self.data.acquired_at
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl Lease<Held> {
    /// Wrap data for a lease the store just granted.
    ///
    /// Only the lock implementation should call this, right after a
    /// successful set-if-absent.
    pub fn new(data: LeaseData) -> Self {
        Lease {
            data,
            _state: PhantomData,
        }
    }

    /// Consume the lease and hand back the data needed for the
    /// ownership-checked delete.
    pub fn release(self) -> LeaseData {
        self.data
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        self.data.remaining_duration(now)
    }
}

impl fmt::Display for Lease<Held> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} held by {}", self.data.lock_key, self.data.token)
    }
}
