//! Lock and id generator behavior over a KV store that can fail on demand.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use seckill_core::{IdSettings, LeaseToken, LockSettings};
use seckill_storage::{DistributedLock, IdGenerator, KvStore, MemoryKvStore};
use seckill_test_utils::assertions::assert_store_error;
use seckill_test_utils::generators::{arb_lock_name, arb_timestamp};
use seckill_test_utils::FlakyKvStore;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_next_id_surfaces_kv_fault() {
    let kv = Arc::new(FlakyKvStore::new(Arc::new(MemoryKvStore::new())));
    let ids = IdGenerator::new(kv.clone(), &IdSettings::default());

    kv.fail_writes(true);
    assert_store_error(&ids.next_id("order").await);

    kv.fail_writes(false);
    let id = ids.next_id("order").await.unwrap();
    assert_eq!(ids.decompose(id).sequence, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// An unreachable store never grants the lock, and a recovered store
    /// grants it exactly once.
    #[test]
    fn prop_lock_is_never_granted_by_a_failing_store(name in arb_lock_name()) {
        runtime().block_on(async {
            let kv = Arc::new(FlakyKvStore::new(Arc::new(MemoryKvStore::new())));
            let lock = DistributedLock::new(kv.clone(), &LockSettings::default());
            let token = LeaseToken::generate();
            let ttl = Duration::from_secs(30);

            kv.fail_writes(true);
            assert_store_error(&lock.try_acquire(&name, &token, ttl).await);
            assert_eq!(kv.get(&lock.lock_key(&name)).await.unwrap(), None);

            kv.fail_all(false);
            assert!(lock.try_acquire(&name, &token, ttl).await.unwrap());
            assert!(!lock.try_acquire(&name, &LeaseToken::generate(), ttl).await.unwrap());
            assert!(lock.release(&name, &token).await.unwrap());
        });
    }

    /// Ids issued at any time in the supported range decompose back to
    /// that second, each day starting its own sequence.
    #[test]
    fn prop_ids_decompose_to_issue_second(at in arb_timestamp()) {
        let (parts, first, second) = runtime().block_on(async {
            let kv = Arc::new(MemoryKvStore::new());
            let ids = IdGenerator::new(kv, &IdSettings::default());
            let first = ids.next_id_at("order", at).await.unwrap();
            let second = ids.next_id_at("order", at).await.unwrap();
            (ids.decompose(first), first, second)
        });

        prop_assert_eq!(parts.issued_at, at);
        prop_assert_eq!(parts.sequence, 1);
        prop_assert!(second > first);
    }
}
