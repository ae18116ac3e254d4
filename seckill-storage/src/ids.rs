//! Composite 64-bit id generation.
//!
//! ```text
//!  63                    32 31                     0
//! +------------------------+------------------------+
//! | seconds since anchor   | daily sequence (INCR)  |
//! +------------------------+------------------------+
//! ```
//!
//! The sequence key is scoped to `(namespace, calendar day)`, so the counter
//! resets implicitly at midnight UTC while the timestamp half keeps ids
//! increasing across days.

use crate::kv::KvStore;
use chrono::{DateTime, Utc};
use seckill_core::{IdSettings, InvariantError, OrderId, SeckillResult, Timestamp};
use std::sync::Arc;

/// An id split back into its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub issued_at: Timestamp,
    pub sequence: u64,
}

#[derive(Clone)]
pub struct IdGenerator {
    kv: Arc<dyn KvStore>,
    key_prefix: String,
    anchor_secs: i64,
    sequence_bits: u32,
}

impl IdGenerator {
    pub fn new(kv: Arc<dyn KvStore>, settings: &IdSettings) -> Self {
        Self {
            kv,
            key_prefix: settings.key_prefix.clone(),
            anchor_secs: settings.epoch_anchor_secs,
            sequence_bits: settings.sequence_bits,
        }
    }

    /// Next id for `namespace` at the current time.
    pub async fn next_id(&self, namespace: &str) -> SeckillResult<OrderId> {
        self.next_id_at(namespace, Utc::now()).await
    }

    /// Next id for `namespace`, with the clock supplied by the caller.
    pub async fn next_id_at(&self, namespace: &str, now: Timestamp) -> SeckillResult<OrderId> {
        let now_secs = now.timestamp();
        let elapsed = now_secs - self.anchor_secs;
        if elapsed < 0 {
            let err = InvariantError::ClockBeforeEpoch {
                now_secs,
                anchor_secs: self.anchor_secs,
            };
            tracing::error!(namespace, error = %err, "refusing to issue id");
            return Err(err.into());
        }

        let max_elapsed = self.max_elapsed_secs();
        if elapsed as u64 > max_elapsed {
            let err = InvariantError::TimestampOverflow {
                elapsed_secs: elapsed,
                max_secs: max_elapsed,
            };
            tracing::error!(namespace, error = %err, "id timestamp half exhausted");
            return Err(err.into());
        }

        let key = self.day_key(namespace, now);
        let sequence = self.kv.increment(&key).await?;

        if sequence <= 0 {
            let err = InvariantError::SequenceUnderflow {
                namespace: namespace.to_string(),
                sequence,
            };
            tracing::error!(key = %key, error = %err, "id sequence corrupted");
            return Err(err.into());
        }

        let max = self.max_sequence();
        if sequence as u64 > max {
            let err = InvariantError::SequenceOverflow {
                namespace: namespace.to_string(),
                sequence,
                max,
            };
            tracing::error!(key = %key, error = %err, "daily id sequence exhausted");
            return Err(err.into());
        }

        Ok(OrderId::new(((elapsed as u64) << self.sequence_bits) | sequence as u64))
    }

    /// KV key holding the sequence for `namespace` on the day of `now`,
    /// e.g. `icr:order:2025:03:14`.
    pub fn day_key(&self, namespace: &str, now: Timestamp) -> String {
        format!("{}{}:{}", self.key_prefix, namespace, now.format("%Y:%m:%d"))
    }

    pub fn decompose(&self, id: OrderId) -> IdParts {
        let raw = id.get();
        let elapsed = (raw >> self.sequence_bits) as i64;
        IdParts {
            issued_at: DateTime::from_timestamp(self.anchor_secs + elapsed, 0).unwrap_or_default(),
            sequence: raw & self.max_sequence(),
        }
    }

    fn max_sequence(&self) -> u64 {
        (1u64 << self.sequence_bits) - 1
    }

    /// Largest elapsed-seconds value that survives the shift intact.
    fn max_elapsed_secs(&self) -> u64 {
        u64::MAX >> self.sequence_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use chrono::TimeZone;
    use seckill_core::SeckillError;
    use std::collections::HashSet;

    fn generator() -> (IdGenerator, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (IdGenerator::new(kv.clone(), &IdSettings::default()), kv)
    }

    fn fixed_now() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_day_key_format() {
        let (ids, _) = generator();
        assert_eq!(ids.day_key("order", fixed_now()), "icr:order:2025:03:14");
    }

    #[tokio::test]
    async fn test_id_layout() {
        let (ids, _) = generator();
        let now = fixed_now();
        let id = ids.next_id_at("order", now).await.unwrap();

        let elapsed = (now.timestamp() - 1_735_689_600) as u64;
        assert_eq!(id.get(), (elapsed << 32) | 1);

        let parts = ids.decompose(id);
        assert_eq!(parts.issued_at, now);
        assert_eq!(parts.sequence, 1);
    }

    #[tokio::test]
    async fn test_ids_increase_within_namespace() {
        let (ids, _) = generator();
        let now = fixed_now();
        let a = ids.next_id_at("order", now).await.unwrap();
        let b = ids.next_id_at("order", now).await.unwrap();
        let c = ids.next_id_at("order", now + chrono::Duration::seconds(1)).await.unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[tokio::test]
    async fn test_namespaces_have_independent_sequences() {
        let (ids, _) = generator();
        let now = fixed_now();
        ids.next_id_at("order", now).await.unwrap();
        let other = ids.next_id_at("refund", now).await.unwrap();
        assert_eq!(ids.decompose(other).sequence, 1);
    }

    #[tokio::test]
    async fn test_new_day_restarts_sequence_but_id_still_grows() {
        let (ids, _) = generator();
        let today = fixed_now();
        let mut last = OrderId::new(0);
        for _ in 0..5 {
            last = ids.next_id_at("order", today).await.unwrap();
        }
        let tomorrow = ids
            .next_id_at("order", today + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(ids.decompose(tomorrow).sequence, 1);
        assert!(tomorrow > last);
    }

    #[tokio::test]
    async fn test_clock_before_anchor_is_invariant_error() {
        let (ids, _) = generator();
        let before = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let err = ids.next_id_at("order", before).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::Invariant(InvariantError::ClockBeforeEpoch { .. })
        ));
    }

    #[tokio::test]
    async fn test_sequence_overflow_is_invariant_error() {
        let (ids, kv) = generator();
        let now = fixed_now();
        kv.set(&ids.day_key("order", now), &u32::MAX.to_string(), None)
            .await
            .unwrap();

        let err = ids.next_id_at("order", now).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::Invariant(InvariantError::SequenceOverflow { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timestamp_overflow_is_invariant_error_not_wraparound() {
        let kv = Arc::new(MemoryKvStore::new());
        let settings = IdSettings {
            sequence_bits: 40,
            ..IdSettings::default()
        };
        let ids = IdGenerator::new(kv.clone(), &settings);
        let anchor = settings.epoch_anchor_secs;
        let last_ok = DateTime::from_timestamp(anchor + (1i64 << 24) - 1, 0).unwrap();
        let first_bad = DateTime::from_timestamp(anchor + (1i64 << 24), 0).unwrap();

        let id = ids.next_id_at("order", last_ok).await.unwrap();
        assert_eq!(ids.decompose(id).issued_at, last_ok);

        let err = ids.next_id_at("order", first_bad).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::Invariant(InvariantError::TimestampOverflow { .. })
        ));
        // Rejected before touching the daily counter.
        assert_eq!(kv.get(&ids.day_key("order", first_bad)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_default_layout_has_room_past_a_century() {
        let (ids, _) = generator();
        let anchor = IdSettings::default().epoch_anchor_secs;
        let edge = DateTime::from_timestamp(anchor + u32::MAX as i64, 0).unwrap();
        let id = ids.next_id_at("order", edge).await.unwrap();
        assert_eq!(ids.decompose(id).issued_at, edge);

        let past = edge + chrono::Duration::seconds(1);
        let err = ids.next_id_at("order", past).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::Invariant(InvariantError::TimestampOverflow { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_ten_thousand_concurrent_ids_are_distinct_and_gapless() {
        let (ids, _) = generator();
        let now = fixed_now();

        let mut handles = Vec::with_capacity(10_000);
        for _ in 0..10_000 {
            let ids = ids.clone();
            handles.push(tokio::spawn(
                async move { ids.next_id_at("order", now).await.unwrap() },
            ));
        }

        let mut seen = HashSet::with_capacity(10_000);
        let mut sequences = Vec::with_capacity(10_000);
        for handle in handles {
            let id = handle.await.unwrap();
            assert!(seen.insert(id));
            sequences.push(ids.decompose(id).sequence);
        }

        sequences.sort_unstable();
        let expected: Vec<u64> = (1..=10_000).collect();
        assert_eq!(sequences, expected);
    }
}
