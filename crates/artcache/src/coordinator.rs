use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared, TryFutureExt};

use crate::error::CacheContents;
use crate::key::ResourceKey;
use crate::utils::CallOnDrop;

type FetchChannel<R> = Shared<oneshot::Receiver<CacheContents<R>>>;
type FetchMap<R> = Arc<Mutex<BTreeMap<ResourceKey, FetchChannel<R>>>>;

/// Tracks in-flight fetches by key and guarantees at most one of them per
/// key at any instant.
///
/// The first caller for a key starts the fetch as an independent task; every
/// concurrent caller for the same key attaches to that task's channel
/// instead of starting a second fetch, and all of them observe the same
/// settled result. The registry entry is removed however the task settles,
/// so a later request for the same key starts fresh.
///
/// Because the work runs on a spawned task, dropping waiters (even all of
/// them) never cancels the fetch itself; its result is still written through
/// to the cache tiers for future requests.
#[derive(Debug)]
pub struct FetchCoordinator<R> {
    in_flight: FetchMap<R>,
}

impl<R> Clone for FetchCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R> Default for FetchCoordinator<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> FetchCoordinator<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Attaches to the in-flight fetch for `key`, spawning `fetch` first if
    /// none is currently running.
    ///
    /// This function is *not* `async`: the fetch task is spawned eagerly and
    /// registered before any suspension point, so a second caller arriving
    /// concurrently observes it whether or not the returned future has been
    /// polled yet.
    pub fn coordinate<F>(&self, key: &ResourceKey, fetch: F) -> BoxFuture<'static, CacheContents<R>>
    where
        F: Future<Output = CacheContents<R>> + Send + 'static,
    {
        let channel = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(channel) = in_flight.get(key) {
                // A concurrent fetch for this key is coalesced.
                metric!(counter("caches.coalesced") += 1);
                channel.clone()
            } else {
                let channel = self.spawn_fetch(key.clone(), fetch);
                let evicted = in_flight.insert(key.clone(), channel.clone());
                debug_assert!(evicted.is_none());
                channel
            }
        };

        let key = key.clone();
        let future = channel.unwrap_or_else(move |_cancelled| {
            let message = format!("fetch channel for `{key}` dropped");
            Err(io::Error::new(io::ErrorKind::Interrupted, message).into())
        });

        Box::pin(future)
    }

    fn spawn_fetch<F>(&self, key: ResourceKey, fetch: F) -> FetchChannel<R>
    where
        F: Future<Output = CacheContents<R>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let in_flight = Arc::clone(&self.in_flight);
        let remove_fetch_token = CallOnDrop::new(move || {
            in_flight.lock().unwrap().remove(&key);
        });

        tokio::spawn(async move {
            let result = fetch.await;
            // Drop the token first to evict from the map. This ensures that
            // callers either get a channel that will receive data, or they
            // spawn a new fetch.
            drop(remove_fetch_token);
            sender.send(result).ok();
        });

        receiver.shared()
    }

    /// The number of distinct keys currently being fetched.
    ///
    /// Waiters do not count; five callers attached to the same fetch are one
    /// entry.
    pub fn len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::CacheError;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::from_locator(name)
    }

    /// A fetch that takes long enough for every test waiter to attach.
    fn counted_fetch(
        fetches: &Arc<AtomicUsize>,
    ) -> impl Future<Output = CacheContents<String>> + Send + 'static {
        let fetches = Arc::clone(fetches);
        async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("artwork".to_string())
        }
    }

    #[test]
    fn test_default_has_nothing_in_flight() {
        let coordinator: FetchCoordinator<String> = FetchCoordinator::default();
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_coalesces_concurrent_fetches() {
        let coordinator = FetchCoordinator::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let key = key("https://example.com/cover.jpg");

        let waiters: Vec<_> = (0..5)
            .map(|_| coordinator.coordinate(&key, counted_fetch(&fetches)))
            .collect();
        assert_eq!(coordinator.len(), 1);

        for result in futures::future::join_all(waiters).await {
            assert_eq!(result.as_deref(), Ok("artwork"));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let coordinator = FetchCoordinator::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        let first = coordinator.coordinate(&key("https://example.com/a"), counted_fetch(&fetches));
        let second = coordinator.coordinate(&key("https://example.com/b"), counted_fetch(&fetches));
        assert_eq!(coordinator.len(), 2);

        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_fetch_running() {
        let coordinator = FetchCoordinator::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let key = key("https://example.com/cover.jpg");

        let first = coordinator.coordinate(&key, counted_fetch(&fetches));
        let second = coordinator.coordinate(&key, counted_fetch(&fetches));

        drop(first);

        assert_eq!(second.await.as_deref(), Ok("artwork"));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_survives_dropping_every_waiter() {
        let coordinator = FetchCoordinator::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let key = key("https://example.com/cover.jpg");

        let fetch = {
            let completed = Arc::clone(&completed);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok("artwork".to_string())
            }
        };

        drop(coordinator.coordinate(&key, fetch));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_failure_fans_out_and_unregisters() {
        let coordinator = FetchCoordinator::<String>::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let key = key("https://example.com/cover.jpg");

        let failing_fetch = |fetches: &Arc<AtomicUsize>| {
            let fetches = Arc::clone(fetches);
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(CacheError::NotFound)
            }
        };

        let first = coordinator.coordinate(&key, failing_fetch(&fetches));
        let second = coordinator.coordinate(&key, failing_fetch(&fetches));

        assert_eq!(first.await, Err(CacheError::NotFound));
        assert_eq!(second.await, Err(CacheError::NotFound));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // no retry happened on behalf of the waiters, but a new request
        // starts fresh
        let third = coordinator.coordinate(&key, failing_fetch(&fetches));
        assert_eq!(third.await, Err(CacheError::NotFound));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
