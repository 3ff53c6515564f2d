// # Import Handle
//
// What a caller gets back from starting an import: the run's generation, a way to
// cancel it, and its eventual outcome.

use crate::import::resolver::Unresolved;
use crate::library::{NewCard, StoreError};
use crate::lock::LockError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Monotonic import run number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("None of the {requested} cards could be found")]
    NothingResolved { requested: usize },
    #[error("Failed to save cards: {0}")]
    Persistence(#[from] StoreError),
    #[error("Import lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Unexpected import error: {0}")]
    Unknown(String),
}

/// What a completed run did
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub generation: Generation,
    /// Distinct intents after de-duplication
    pub requested: usize,
    /// Cards committed, in intent order
    pub committed: Vec<NewCard>,
    pub failed: Vec<Unresolved>,
}

impl ImportSummary {
    pub fn imported(&self) -> usize {
        self.committed.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug)]
pub enum ImportOutcome {
    Completed(ImportSummary),
    /// Cancelled by the caller or superseded by a newer run
    Cancelled,
    Failed(ImportError),
    /// Nothing to import; no run was started
    NoValidCards,
}

impl ImportOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ImportOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportOutcome::Cancelled)
    }

    pub fn summary(&self) -> Option<&ImportSummary> {
        match self {
            ImportOutcome::Completed(summary) => Some(summary),
            _ => None,
        }
    }
}

pub type OnComplete = Box<dyn FnOnce(&ImportSummary) + Send + 'static>;

/// Per-call options for `ImportOrchestrator::process`
#[derive(Default)]
pub struct ProcessOptions {
    /// Suppress user notifications; used by follow-up runs
    pub silent: bool,
    /// External cancellation signal
    pub signal: Option<CancellationToken>,
    pub(crate) on_complete: Option<OnComplete>,
}

impl ProcessOptions {
    pub fn silent() -> Self {
        ProcessOptions {
            silent: true,
            ..Default::default()
        }
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Called once, after the run's cards are committed
    pub fn on_complete(mut self, callback: impl FnOnce(&ImportSummary) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

enum PendingOutcome {
    Ready(ImportOutcome),
    Running(JoinHandle<ImportOutcome>),
}

/// Handle to one started import run
pub struct ImportRun {
    generation: Generation,
    cancel: CancellationToken,
    current: Arc<AtomicU64>,
    outcome: PendingOutcome,
}

impl ImportRun {
    pub(crate) fn running(
        generation: Generation,
        cancel: CancellationToken,
        current: Arc<AtomicU64>,
        task: JoinHandle<ImportOutcome>,
    ) -> Self {
        ImportRun {
            generation,
            cancel,
            current,
            outcome: PendingOutcome::Running(task),
        }
    }

    pub(crate) fn finished(
        generation: Generation,
        current: Arc<AtomicU64>,
        outcome: ImportOutcome,
    ) -> Self {
        ImportRun {
            generation,
            cancel: CancellationToken::new(),
            current,
            outcome: PendingOutcome::Ready(outcome),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Ask the run to stop; it settles as `Cancelled` unless it already committed
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether no newer run has started since this one
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation.0
    }

    /// Wait for the run to settle. Dropping the handle instead leaves the run going.
    pub async fn outcome(self) -> ImportOutcome {
        match self.outcome {
            PendingOutcome::Ready(outcome) => outcome,
            PendingOutcome::Running(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Import run {} did not finish: {}", self.generation, e);
                    ImportOutcome::Failed(ImportError::Unknown(e.to_string()))
                }
            },
        }
    }
}
