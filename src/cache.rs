use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default time an entry stays usable after it was created
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Default maximum number of entries kept in the table
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Configuration for the request cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a settled or in-flight entry may be reused
    pub ttl: Duration,
    /// Maximum number of entries before oldest-first eviction, at least 1
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// One in-flight or settled lookup
struct CacheEntry<T: Clone> {
    future: Shared<BoxFuture<'static, T>>,
    created_at: Instant,
    /// Insertion order, breaks ties between entries created in the same instant
    seq: u64,
}

struct CacheTable<T: Clone> {
    entries: HashMap<String, CacheEntry<T>>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

/// Request coalescer for external lookups.
///
/// Concurrent `get` calls for the same key share one underlying future, so a provider
/// is called once no matter how many callers ask. Entries expire after the TTL and the
/// table is bounded; removing an entry never cancels callers that already hold its
/// future, it only makes the next caller start a fresh lookup.
pub struct RequestCache<T: Clone> {
    config: CacheConfig,
    table: Arc<Mutex<CacheTable<T>>>,
}

impl<T> RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(mut config: CacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        RequestCache {
            config,
            table: Arc::new(Mutex::new(CacheTable {
                entries: HashMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Return the shared value for `key`, calling `produce` only if no live entry exists.
    pub async fn get<F, Fut>(&self, key: &str, produce: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.entry_for(key, |_| produce().boxed()).await
    }

    /// Live shared future for `key`, or a new one built by `produce` from the
    /// sequence number its entry will carry.
    fn entry_for<F>(&self, key: &str, produce: F) -> Shared<BoxFuture<'static, T>>
    where
        F: FnOnce(u64) -> BoxFuture<'static, T>,
    {
        let mut table = self.lock_table();
        let now = Instant::now();

        if let Some(entry) = table.entries.get(key) {
            if now.duration_since(entry.created_at) < self.config.ttl {
                trace!("RequestCache: hit for {}", key);
                let hit = entry.future.clone();
                table.hits += 1;
                return hit;
            }
            debug!("RequestCache: entry for {} expired", key);
            table.entries.remove(key);
        }

        table.misses += 1;
        self.evict_to_fit(&mut table, now);

        let seq = table.next_seq;
        table.next_seq += 1;
        let future = produce(seq).shared();
        table.entries.insert(
            key.to_string(),
            CacheEntry {
                future: future.clone(),
                created_at: now,
                seq,
            },
        );
        trace!("RequestCache: miss for {}, {} entries", key, table.entries.len());
        future
    }

    /// Drop expired entries, then the oldest ones until there is room for one more.
    fn evict_to_fit(&self, table: &mut CacheTable<T>, now: Instant) {
        let ttl = self.config.ttl;
        table
            .entries
            .retain(|_, entry| now.duration_since(entry.created_at) < ttl);

        while table.entries.len() >= self.config.max_entries && !table.entries.is_empty() {
            let oldest = table
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.created_at, entry.seq))
                .map(|(key, _)| key.clone());

            if let Some(key) = oldest {
                table.entries.remove(&key);
                debug!("RequestCache: evicted {}", key);
            }
        }
    }

    /// Number of entries currently in the table (expired ones included until touched)
    pub fn len(&self) -> usize {
        self.lock_table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        let table = self.lock_table();
        table
            .entries
            .get(key)
            .is_some_and(|entry| entry.created_at.elapsed() < self.config.ttl)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.lock_table().entries.clear();
        debug!("RequestCache: cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let table = self.lock_table();
        CacheStats {
            entries: table.entries.len(),
            max_entries: self.config.max_entries,
            hits: table.hits,
            misses: table.misses,
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, CacheTable<T>> {
        lock(&self.table)
    }
}

fn lock<T: Clone>(table: &Mutex<CacheTable<T>>) -> std::sync::MutexGuard<'_, CacheTable<T>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove the entry for `key` if it is still the one identified by `seq`.
fn forget<T: Clone>(table: &Mutex<CacheTable<T>>, key: &str, seq: u64) {
    let mut table = lock(table);
    if table.entries.get(key).is_some_and(|entry| entry.seq == seq) {
        table.entries.remove(key);
        debug!("RequestCache: dropped failed entry {}", key);
    }
}

impl<V, E> RequestCache<Result<V, E>>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    /// Like `get`, but the lookup runs as its own task and a failed lookup removes
    /// its entry when it settles, so the next caller retries instead of reusing the
    /// error. The task keeps running when every caller stops waiting.
    pub async fn get_result<F, Fut>(&self, key: &str, produce: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let table = Arc::downgrade(&self.table);
        let owned_key = key.to_string();
        let future = self.entry_for(key, move |seq| {
            let request = produce();
            let task = tokio::spawn(async move {
                let result = request.await;
                if result.is_err() {
                    if let Some(table) = table.upgrade() {
                        forget(&table, &owned_key, seq);
                    }
                }
                result
            });
            async move { task.await.unwrap_or_else(|e| Err(E::from(e))) }.boxed()
        });
        future.await
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_produce(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, u32> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                value
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_produce() {
        let cache = RequestCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let results = futures::future::join_all(
            (0..5).map(|_| cache.get("scryfall:sol ring", counting_produce(&calls, 7))),
        )
        .await;

        assert_eq!(results, vec![7; 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_produced_again() {
        let cache = RequestCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.get("k", counting_produce(&calls, 1)).await, 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get("k", counting_produce(&calls, 2)).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("k", counting_produce(&calls, 3)).await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_single_oldest_entry() {
        let max = 4;
        let cache = RequestCache::new(CacheConfig {
            ttl: DEFAULT_TTL,
            max_entries: max,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..=max {
            cache.get(&format!("key-{}", i), counting_produce(&calls, i as u32)).await;
            tokio::time::advance(Duration::from_millis(1)).await;
            assert!(cache.len() <= max);
        }

        assert_eq!(cache.len(), max);
        assert!(!cache.contains("key-0"));
        for i in 1..=max {
            assert!(cache.contains(&format!("key-{}", i)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_does_not_cancel_waiting_callers() {
        let cache = RequestCache::new(CacheConfig {
            ttl: DEFAULT_TTL,
            max_entries: 1,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let first_produce = counting_produce(&calls, 10);
        let first = cache.entry_for("a", |_| first_produce());
        // Inserting "b" pushes "a" out while its future is still pending
        let second_produce = counting_produce(&calls, 20);
        let second = cache.entry_for("b", |_| second_produce());
        assert!(!cache.contains("a"));

        assert_eq!(first.await, 10);
        assert_eq!(second.await, 20);

        assert_eq!(cache.get("a", counting_produce(&calls, 11)).await, 11);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct LookupFailed(String);

    impl From<JoinError> for LookupFailed {
        fn from(e: JoinError) -> Self {
            LookupFailed(e.to_string())
        }
    }

    #[tokio::test]
    async fn test_failed_result_is_not_kept() {
        let cache: RequestCache<Result<u32, LookupFailed>> =
            RequestCache::new(CacheConfig::default());

        let first = cache
            .get_result("k", || async { Err(LookupFailed("boom".to_string())) })
            .await;
        assert_eq!(first, Err(LookupFailed("boom".to_string())));
        assert!(!cache.contains("k"));

        let second = cache.get_result("k", || async { Ok(5) }).await;
        assert_eq!(second, Ok(5));
        assert!(cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_waiters_is_dropped() {
        let cache: RequestCache<Result<u32, LookupFailed>> =
            RequestCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let failing_calls = calls.clone();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_result("k", move || {
                failing_calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(LookupFailed("503".to_string()))
                }
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(cache.contains("k"));

        // Let the detached lookup settle with nobody waiting on it
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cache.contains("k"));

        let retry_calls = calls.clone();
        let retried = cache
            .get_result("k", move || {
                retry_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(retried, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_still_holds_one_entry() {
        let cache = RequestCache::new(CacheConfig {
            ttl: DEFAULT_TTL,
            max_entries: 0,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get("a", counting_produce(&calls, 1)).await;
        cache.get("b", counting_produce(&calls, 2)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().max_entries, 1);
        assert!(cache.contains("b"));
    }
}
