//! Physical shapes of cache entries.
//!
//! Plain entries hold the JSON-serialized value (or the absence sentinel)
//! under a store-level TTL. Logical-expiry entries wrap the value with an
//! application-judged deadline and carry no store-level TTL at all.

use chrono::Utc;
use seckill_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Value written for "confirmed absent in the durable store".
pub const ABSENT_SENTINEL: &str = "";

/// A cache key: a caller-chosen prefix followed by the record id,
/// e.g. `cache:shop:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(prefix: &str, id: &impl fmt::Display) -> Self {
        Self(format!("{}{}", prefix, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wrapped payload for logical expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<V> {
    pub data: V,
    pub logical_expire_at: Timestamp,
}

impl<V> LogicalEntry<V> {
    /// Wrap `data` so that it turns stale `window` after `now`.
    pub fn new(data: V, window: Duration, now: Timestamp) -> Self {
        let logical_expire_at = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_add_signed(w))
            .unwrap_or(now);
        Self {
            data,
            logical_expire_at,
        }
    }

    pub fn fresh(data: V, window: Duration) -> Self {
        Self::new(data, window, Utc::now())
    }

    /// Past-deadline entries are stale but still served.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.logical_expire_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_concatenates_prefix_and_id() {
        let key = CacheKey::new("cache:shop:", &42);
        assert_eq!(key.as_str(), "cache:shop:42");
        assert_eq!(key.to_string(), "cache:shop:42");
    }

    #[test]
    fn test_logical_entry_wire_shape() {
        let now = Utc::now();
        let entry = LogicalEntry::new("payload".to_string(), Duration::from_secs(20), now);
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["data"], "payload");
        assert!(json.get("logicalExpireAt").is_some());
    }

    #[test]
    fn test_logical_entry_expiry() {
        let now = Utc::now();
        let entry = LogicalEntry::new(1u32, Duration::from_secs(20), now);
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(20)));
    }
}
