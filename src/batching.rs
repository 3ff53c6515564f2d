use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Per-provider batch ceilings and pacing
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLimits {
    /// Names per alternate-art search request
    pub alt_art_chunk: usize,
    /// Card names per token-enrichment request
    pub token_chunk: usize,
    /// Identifiers per canonical collection lookup
    pub collection_chunk: usize,
    /// Raw image downloads running at once
    pub image_concurrency: usize,
    /// Minimum spacing between requests to the canonical catalog
    pub catalog_delay: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            alt_art_chunk: 50,
            token_chunk: 100,
            collection_chunk: 75,
            image_concurrency: 10,
            catalog_delay: Duration::from_millis(100),
        }
    }
}

/// Split `items` into consecutive chunks of at most `size` elements.
///
/// A zero size is treated as one so that callers never loop forever on bad config.
pub fn chunked<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// Serializes calls to one provider and keeps a minimum gap between call starts.
pub struct RateLimiter {
    name: &'static str,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        RateLimiter {
            name,
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Wait for this caller's turn, then run `call` while holding the slot.
    ///
    /// The next caller may start `min_interval` after this one started. Returns `None`
    /// without calling anything if `cancel` fires while waiting.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, call: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut last_start = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            guard = self.last_start.lock() => guard,
        };

        if let Some(previous) = *last_start {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                trace!("RateLimiter[{}]: waiting {:?}", self.name, ready_at - Instant::now());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep_until(ready_at) => {}
                }
            }
        }

        *last_start = Some(Instant::now());

        // The slot stays taken until the call settles
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            value = call() => Some(value),
        };
        drop(last_start);
        result
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_chunked_sizes() {
        let items: Vec<u32> = (0..160).collect();
        let chunks = chunked(&items, 75);
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![75, 75, 10]
        );
        assert_eq!(chunks[2][0], 150);
        assert!(chunked::<u32>(&[], 75).is_empty());
        assert_eq!(chunked(&[1, 2, 3], 0).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = Arc::new(RateLimiter::new("test", Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let origin = Instant::now();

        let calls = (0..3).map(|_| {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let started = started.clone();
            async move {
                limiter
                    .run(&cancel, || async {
                        started.lock().unwrap().push(origin.elapsed());
                    })
                    .await
            }
        });
        futures::future::join_all(calls).await;

        let started = started.lock().unwrap();
        assert_eq!(started.len(), 3);
        assert!(started[1] - started[0] >= Duration::from_millis(100));
        assert!(started[2] - started[1] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_skips_call() {
        let limiter = RateLimiter::new("test", Duration::from_millis(100));
        let cancel = CancellationToken::new();

        assert_eq!(limiter.run(&cancel, || async { 1 }).await, Some(1));
        cancel.cancel();
        assert_eq!(limiter.run(&cancel, || async { 2 }).await, None);
    }
}
