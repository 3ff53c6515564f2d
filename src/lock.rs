// # FIFO Lock
//
// Async mutual exclusion with strict arrival-order hand-off. Unlike a guard-based
// mutex, the lock carries no ownership token: whoever acquired it must call
// `release()` exactly once. Releasing a free lock is reported as an error.

use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{trace, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("release() called while the lock is not held")]
    NotHeld,
}

#[derive(Default)]
struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Binary async lock granting waiters strictly in the order they called `acquire()`.
#[derive(Default)]
pub struct FifoLock {
    state: Mutex<LockState>,
}

impl FifoLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock is granted to this caller.
    ///
    /// Resolves immediately when the lock is free. Otherwise the caller joins the back
    /// of the queue and is woken by the `release()` that hands the lock over.
    /// Dropping the returned future before it resolves gives up the place in the
    /// queue; if the grant already arrived it is passed on to the next waiter.
    pub async fn acquire(&self) {
        let rx = {
            let mut state = self.lock_state();
            if !state.held {
                state.held = true;
                trace!("FifoLock: granted immediately");
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            trace!("FifoLock: queued behind {} waiter(s)", state.waiters.len() - 1);
            rx
        };

        let mut pending = PendingGrant {
            lock: self,
            rx: Some(rx),
        };
        pending.wait().await;
    }

    /// Hand the lock to the next queued waiter, or mark it free if nobody is waiting.
    pub fn release(&self) -> Result<(), LockError> {
        let mut state = self.lock_state();
        if !state.held {
            warn!("FifoLock: release() without a matching acquire()");
            return Err(LockError::NotHeld);
        }

        while let Some(next) = state.waiters.pop_front() {
            // A failed send means that waiter gave up; skip to the one behind it
            if next.send(()).is_ok() {
                trace!("FifoLock: handed over, {} still queued", state.waiters.len());
                return Ok(());
            }
        }

        state.held = false;
        Ok(())
    }

    /// Whether some caller currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.lock_state().held
    }

    /// Number of callers waiting for the lock.
    pub fn queue_len(&self) -> usize {
        self.lock_state().waiters.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A queued acquire. Passes an unobserved grant on if dropped.
struct PendingGrant<'a> {
    lock: &'a FifoLock,
    rx: Option<oneshot::Receiver<()>>,
}

impl PendingGrant<'_> {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // The sender only disappears together with the lock itself
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                let _ = self.lock.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_free_lock_is_immediate() {
        let lock = FifoLock::new();
        lock.acquire().await;
        assert!(lock.is_held());
        lock.release().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_without_acquire_is_an_error() {
        let lock = FifoLock::new();
        assert_eq!(lock.release(), Err(LockError::NotHeld));
    }

    #[tokio::test]
    async fn test_waiters_granted_in_call_order() {
        let lock = Arc::new(FifoLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let holders = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        lock.acquire().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let task_lock = lock.clone();
            let order = order.clone();
            let holders = holders.clone();
            tasks.push(tokio::spawn(async move {
                task_lock.acquire().await;
                let now = holders.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(now, 0, "more than one holder at a time");
                order.lock().unwrap().push(i);
                tokio::task::yield_now().await;
                holders.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                task_lock.release().unwrap();
            }));
            // Make sure task i is queued before task i + 1 is spawned
            while lock.queue_len() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        lock.release().unwrap();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let lock = Arc::new(FifoLock::new());
        lock.acquire().await;

        let abandoned = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        while lock.queue_len() < 1 {
            tokio::task::yield_now().await;
        }

        let survivor = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.acquire().await;
                lock.release().unwrap();
            })
        };
        while lock.queue_len() < 2 {
            tokio::task::yield_now().await;
        }

        abandoned.abort();
        let _ = abandoned.await;

        lock.release().unwrap();
        tokio::time::timeout(Duration::from_secs(1), survivor)
            .await
            .expect("survivor should be granted")
            .unwrap();
        assert!(!lock.is_held());
    }
}
