//! Durable-store lookups the cache falls through to.

use async_trait::async_trait;
use seckill_core::SeckillResult;
use std::future::Future;

/// Fetch the canonical record for `id`, or `None` when it does not exist.
///
/// An `Err` means the durable store itself failed; the cache never turns
/// that into a cached absence.
#[async_trait]
pub trait Loader<K, V>: Send + Sync
where
    K: Send + Sync,
{
    async fn load(&self, id: &K) -> SeckillResult<Option<V>>;
}

/// Adapts an async closure into a [`Loader`].
#[derive(Clone)]
pub struct FnLoader<F> {
    f: F,
}

/// Wrap `f` as a loader. The closure receives an owned copy of the id.
///
/// ```ignore
/// let loader = loader_fn(|id: ResourceId| async move { store.get_resource(id).await });
/// ```
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader { f }
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = SeckillResult<Option<V>>> + Send + 'static,
{
    async fn load(&self, id: &K) -> SeckillResult<Option<V>> {
        (self.f)(id.clone()).await
    }
}
