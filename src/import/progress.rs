use crate::import::handle::Generation;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::trace;

/// Lifecycle events of an import run
#[derive(Debug, Clone, PartialEq)]
pub enum ImportProgress {
    Started {
        generation: Generation,
        intents: usize,
    },
    Resolved {
        generation: Generation,
        resolved: usize,
        unresolved: usize,
    },
    Committed {
        generation: Generation,
        cards: usize,
    },
    Completed {
        generation: Generation,
        imported: usize,
        failed: usize,
    },
    Cancelled {
        generation: Generation,
    },
    Failed {
        generation: Generation,
        error: String,
    },
}

impl ImportProgress {
    pub fn generation(&self) -> Generation {
        match self {
            ImportProgress::Started { generation, .. }
            | ImportProgress::Resolved { generation, .. }
            | ImportProgress::Committed { generation, .. }
            | ImportProgress::Completed { generation, .. }
            | ImportProgress::Cancelled { generation }
            | ImportProgress::Failed { generation, .. } => *generation,
        }
    }

    /// Whether this event ends its run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportProgress::Completed { .. }
                | ImportProgress::Cancelled { .. }
                | ImportProgress::Failed { .. }
        )
    }
}

type SubscriptionId = u64;

/// Filter criteria for progress subscriptions
#[derive(Debug, Clone)]
enum SubscriptionFilter {
    All,
    Generation(Generation),
}

impl SubscriptionFilter {
    fn matches(&self, progress: &ImportProgress) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Generation(generation) => progress.generation() == *generation,
        }
    }
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: tokio_mpsc::UnboundedSender<ImportProgress>,
}

/// Fan-out of progress events to subscribers
#[derive(Clone, Default)]
pub struct ImportProgressHandle {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl ImportProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `progress` to every matching subscriber.
    /// Subscriptions whose receiver was dropped are removed.
    pub fn emit(&self, progress: ImportProgress) {
        trace!("Import progress: {:?}", progress);
        let mut subs = self.lock();
        subs.retain(|_, sub| !sub.filter.matches(&progress) || sub.tx.send(progress.clone()).is_ok());
    }

    /// Subscribe to every run's progress
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::All)
    }

    /// Subscribe to the progress of one run
    pub fn subscribe_generation(
        &self,
        generation: Generation,
    ) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::Generation(generation))
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(id, Subscription { filter, tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
