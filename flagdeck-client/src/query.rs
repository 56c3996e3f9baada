//! Read-through queries over the cache store.
//!
//! [`QueryClient::fetch`] serves a fresh entry or fetches under a
//! [`FetchTicket`](flagdeck_cache::FetchTicket); a ticket cancelled while the
//! request is in flight loses its write. [`QueryClient::observe`] keeps a key
//! populated for as long as the returned [`Observer`] lives.

use crate::error::ClientResult;
use flagdeck_cache::{CacheEvent, CacheKey, CacheRead, CacheStore, Freshness, KeyWatch};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: Arc<CacheStore>,
    stale_time: Duration,
}

impl QueryClient {
    pub fn new(cache: Arc<CacheStore>, stale_time: Duration) -> Self {
        Self { cache, stale_time }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// The read contract used when a caller has no stronger requirement.
    pub fn default_freshness(&self) -> Freshness {
        Freshness::best_effort(self.stale_time)
    }

    /// Serve `key` from the cache when `freshness` allows it, otherwise fetch.
    ///
    /// When the fetch is cancelled while in flight (by a mutation capturing
    /// the key) its result is not written; the current cached value is
    /// returned instead, or the fetched value when nothing is cached.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: CacheKey,
        freshness: Freshness,
        fetcher: F,
    ) -> ClientResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        if let Some(read) = self.cache.get::<T>(&key)? {
            if freshness.accepts(&read) {
                return Ok(read);
            }
        }

        let ticket = self.cache.begin_fetch(&key)?;
        let value = match fetcher().await {
            Ok(value) => value,
            Err(err) => {
                self.cache.abandon_fetch(ticket)?;
                return Err(err);
            }
        };

        if self.cache.complete_fetch(ticket, &value)? {
            return Ok(CacheRead::from_server(value));
        }
        match self.cache.get::<T>(&key)? {
            Some(current) => Ok(current),
            None => Ok(CacheRead::from_server(value)),
        }
    }

    /// Keep `key` populated: fetch now if it is missing or stale, then again
    /// every time it is invalidated. Stops when the [`Observer`] is dropped
    /// or the cache is cleared.
    pub fn observe<T, F, Fut>(&self, key: CacheKey, fetcher: F) -> ClientResult<Observer>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let watch = self.cache.watch(key)?;
        // Subscribe before spawning so no invalidation is missed.
        let mut events = self.cache.subscribe();
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            let needs_fetch = !matches!(cache.is_stale(&key), Ok(Some(false)));
            if needs_fetch {
                refresh(&cache, key, &fetcher).await;
            }
            loop {
                match events.recv().await {
                    Ok(CacheEvent::Invalidated(invalidated)) if invalidated == key => {
                        refresh(&cache, key, &fetcher).await;
                    }
                    Ok(CacheEvent::Cleared) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(key = %key, skipped, "observer lagged; refetching");
                        refresh(&cache, key, &fetcher).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Observer { watch, task })
    }
}

async fn refresh<T, F, Fut>(cache: &CacheStore, key: CacheKey, fetcher: &F)
where
    T: Serialize,
    F: Fn() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let ticket = match cache.begin_fetch(&key) {
        Ok(ticket) => ticket,
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "could not start refetch");
            return;
        }
    };
    let outcome = match fetcher().await {
        Ok(value) => cache.complete_fetch(ticket, &value).map(|_| ()),
        Err(err) => {
            tracing::debug!(key = %key, error = %err, "background refetch failed");
            cache.abandon_fetch(ticket)
        }
    };
    if let Err(err) = outcome {
        tracing::warn!(key = %key, error = %err, "refetch could not update cache");
    }
}

/// Active subscriber of one cache key. Dropping it stops the refetch task.
#[derive(Debug)]
pub struct Observer {
    watch: KeyWatch,
    task: JoinHandle<()>,
}

impl Observer {
    pub fn key(&self) -> &CacheKey {
        self.watch.key()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use flagdeck_core::{EntityIdType, ProjectId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> QueryClient {
        QueryClient::new(Arc::new(CacheStore::default()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_fetch_serves_fresh_entry_without_calling_fetcher() {
        let query = client();
        query.cache().set(&CacheKey::Projects, &vec![1u32, 2]).unwrap();

        let read: CacheRead<Vec<u32>> = query
            .fetch(CacheKey::Projects, query.default_freshness(), || async {
                Err(ClientError::Transport("fetcher must not run".to_string()))
            })
            .await
            .unwrap();

        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_refetches_stale_and_consistent_reads() {
        let query = client();
        let key = CacheKey::Scopes(ProjectId::now_v7());
        query.cache().set(&key, &1u32).unwrap();
        query.cache().invalidate(&key).unwrap();

        let read: CacheRead<u32> = query
            .fetch(key, query.default_freshness(), || async { Ok(2u32) })
            .await
            .unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(*read.value(), 2);

        let read: CacheRead<u32> = query
            .fetch(key, Freshness::consistent(), || async { Ok(3u32) })
            .await
            .unwrap();
        assert_eq!(*read.value(), 3);
        assert_eq!(query.cache().get::<u32>(&key).unwrap().unwrap().into_value(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_does_not_overwrite_optimistic_value() {
        let query = client();
        let cache = Arc::clone(query.cache());
        let key = CacheKey::Projects;

        let read: CacheRead<u32> = query
            .fetch(key, Freshness::consistent(), || async move {
                // A mutation captures the key while the request is in flight.
                cache.cancel_in_flight(&key).unwrap();
                cache.set(&key, &42u32).unwrap();
                Ok(7u32)
            })
            .await
            .unwrap();

        assert_eq!(*read.value(), 42);
        assert_eq!(query.cache().stats().unwrap().discarded_fetches, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_ticket() {
        let query = client();
        let result: ClientResult<CacheRead<u32>> = query
            .fetch(CacheKey::Users, Freshness::consistent(), || async {
                Err(ClientError::Transport("connection refused".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(!query.cache().has_fetch_in_flight(&CacheKey::Users).unwrap());
    }

    #[tokio::test]
    async fn test_observer_refetches_on_invalidate_and_stops_on_drop() {
        let query = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::Users;
        let mut events = query.cache().subscribe();

        let counter = Arc::clone(&calls);
        let observer = query
            .observe(key, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) as u32;
                async move { Ok(n) }
            })
            .unwrap();
        assert_eq!(observer.key(), &key);

        wait_for_update(&mut events, key).await;
        assert_eq!(query.cache().get::<u32>(&key).unwrap().unwrap().into_value(), 0);

        query.cache().invalidate(&key).unwrap();
        wait_for_update(&mut events, key).await;
        assert_eq!(query.cache().get::<u32>(&key).unwrap().unwrap().into_value(), 1);

        drop(observer);
        assert_eq!(query.cache().observer_count(&key).unwrap(), 0);
    }

    async fn wait_for_update(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>, key: CacheKey) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(CacheEvent::Updated(updated)) = events.recv().await {
                    if updated == key {
                        break;
                    }
                }
            }
        })
        .await
        .expect("observer did not write the key");
    }
}
