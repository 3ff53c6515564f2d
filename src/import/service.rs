// # Import Service - Orchestrator
//
// Sequences one import run: de-duplicate -> resolve -> commit -> notify.
//
// Every call to `start` bumps the generation and cancels the previous run. A run
// checks its generation and cancellation token at each checkpoint and re-checks
// both under the commit lock, so results of a superseded run are never written.

use crate::cache::CacheConfig;
use crate::batching::BatchLimits;
use crate::config::Config;
use crate::db::ImageSource;
use crate::import::handle::{
    Generation, ImportError, ImportOutcome, ImportRun, ImportSummary, ProcessOptions,
};
use crate::import::progress::{ImportProgress, ImportProgressHandle};
use crate::import::resolver::{
    ArtSource, CardCatalog, ProviderError, ResolutionReport, ResolvedImage, Resolver,
};
use crate::import::token_processor::TokenPostProcessor;
use crate::import::types::{dedupe_intents, ImportIntent, IntentSource};
use crate::library::{CardStore, CommitBatch, NewCard, NewImage};
use crate::lock::FifoLock;
use crate::mpc::MpcClient;
use crate::ports::{ImportSettings, Notifier};
use crate::scryfall::ScryfallClient;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const NO_VALID_CARDS: &str = "No valid cards found to import.";

/// Observable orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Running { generation: Generation },
}

/// How a run ended before it produced a summary
enum RunError {
    Cancelled,
    Failed(ImportError),
}

struct Inner {
    resolver: Resolver,
    store: Arc<dyn CardStore>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<dyn ImportSettings>,
    commit_lock: FifoLock,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<(Generation, CancellationToken)>>,
    state: Mutex<ImportState>,
    progress: ImportProgressHandle,
    tokens: TokenPostProcessor,
    /// Most recently spawned token pass
    token_task: Mutex<Option<JoinHandle<Option<ImportOutcome>>>>,
}

/// Import orchestrator, cheap to clone
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    pub fn new(
        resolver: Resolver,
        store: Arc<dyn CardStore>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn ImportSettings>,
    ) -> Self {
        ImportOrchestrator {
            inner: Arc::new(Inner {
                resolver,
                store,
                notifier,
                settings,
                commit_lock: FifoLock::new(),
                generation: Arc::new(AtomicU64::new(0)),
                active: Mutex::new(None),
                state: Mutex::new(ImportState::Idle),
                progress: ImportProgressHandle::new(),
                tokens: TokenPostProcessor::new(),
                token_task: Mutex::new(None),
            }),
        }
    }

    /// Orchestrator over the given providers
    pub fn with_providers(
        catalog: Arc<dyn CardCatalog>,
        art: Arc<dyn ArtSource>,
        limits: BatchLimits,
        cache: CacheConfig,
        store: Arc<dyn CardStore>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn ImportSettings>,
    ) -> Self {
        Self::new(
            Resolver::new(catalog, art, limits, cache),
            store,
            notifier,
            settings,
        )
    }

    /// Orchestrator over the live providers described by `config`
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CardStore>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn ImportSettings>,
    ) -> Result<Self, reqwest::Error> {
        let client = config.http_client()?;
        let catalog = ScryfallClient::new(client.clone())
            .with_base_url(&config.scryfall_base_url)
            .with_user_agent(&config.user_agent);
        let art = MpcClient::new(client)
            .with_base_url(&config.mpc_base_url)
            .with_image_url_prefix(&config.mpc_image_url_prefix);

        Ok(Self::with_providers(
            Arc::new(catalog),
            Arc::new(art),
            config.batch_limits.clone(),
            config.cache.clone(),
            store,
            notifier,
            settings,
        ))
    }

    /// Import `intents` with default options
    pub async fn process_cards(&self, intents: Vec<ImportIntent>) -> ImportOutcome {
        self.process(intents, ProcessOptions::default()).await
    }

    /// Import `intents` and wait for the run to settle
    pub async fn process(&self, intents: Vec<ImportIntent>, options: ProcessOptions) -> ImportOutcome {
        self.start(intents, options).outcome().await
    }

    /// Start a run in the background, superseding any run still in progress
    pub fn start(&self, intents: Vec<ImportIntent>, options: ProcessOptions) -> ImportRun {
        if intents.is_empty() {
            if options.silent {
                debug!("Silent import with no intents, nothing to do");
            } else {
                self.inner.notifier.show_error(NO_VALID_CARDS);
            }
            return ImportRun::finished(
                self.current_generation(),
                self.inner.generation.clone(),
                ImportOutcome::NoValidCards,
            );
        }

        let (generation, cancel) = {
            let mut active = self.lock_active();
            let generation = Generation(self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1);
            let cancel = activate(&mut active, generation, options.signal.as_ref());
            *self.lock_state() = ImportState::Running { generation };
            (generation, cancel)
        };
        self.launch(generation, cancel, intents, options)
    }

    /// Start a run only if no other run started since `trigger`. The check and the
    /// generation bump happen together, so a run started concurrently is never
    /// superseded by this one.
    pub fn start_after(
        &self,
        trigger: Generation,
        intents: Vec<ImportIntent>,
        options: ProcessOptions,
    ) -> Option<ImportRun> {
        if intents.is_empty() {
            return None;
        }

        let (generation, cancel) = {
            let mut active = self.lock_active();
            let next = Generation(trigger.value() + 1);
            self.inner
                .generation
                .compare_exchange(trigger.value(), next.value(), Ordering::SeqCst, Ordering::SeqCst)
                .ok()?;
            let cancel = activate(&mut active, next, options.signal.as_ref());
            *self.lock_state() = ImportState::Running { generation: next };
            (next, cancel)
        };
        Some(self.launch(generation, cancel, intents, options))
    }

    fn launch(
        &self,
        generation: Generation,
        cancel: CancellationToken,
        intents: Vec<ImportIntent>,
        options: ProcessOptions,
    ) -> ImportRun {
        info!("Starting import {} with {} intent(s)", generation, intents.len());

        let this = self.clone();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move { this.run(generation, intents, options, run_cancel).await });

        ImportRun::running(generation, cancel, self.inner.generation.clone(), task)
    }

    /// Cancel the active run, if any. Returns whether one was cancelled.
    pub fn cancel(&self) -> bool {
        match self.lock_active().take() {
            Some((generation, token)) => {
                info!("Cancelling import {}", generation);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn subscribe_progress(&self) -> tokio::sync::mpsc::UnboundedReceiver<ImportProgress> {
        self.inner.progress.subscribe_all()
    }

    pub fn progress_handle(&self) -> &ImportProgressHandle {
        &self.inner.progress
    }

    pub fn state(&self) -> ImportState {
        *self.lock_state()
    }

    pub fn current_generation(&self) -> Generation {
        Generation(self.inner.generation.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current_generation() == generation
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.inner.store
    }

    pub fn token_pass_running(&self) -> bool {
        self.inner.tokens.is_running()
    }

    async fn run(
        &self,
        generation: Generation,
        intents: Vec<ImportIntent>,
        mut options: ProcessOptions,
        cancel: CancellationToken,
    ) -> ImportOutcome {
        let intents = dedupe_intents(intents);
        self.inner.progress.emit(ImportProgress::Started {
            generation,
            intents: intents.len(),
        });

        let result = self.execute(generation, &intents, &cancel).await;
        let outcome = match result {
            Ok(summary) => {
                if let Some(on_complete) = options.on_complete.take() {
                    if self.is_current(generation) {
                        on_complete(&summary);
                    } else {
                        debug!("Import {} superseded after commit, skipping on_complete", generation);
                    }
                }
                self.report_success(&summary, options.silent);
                self.inner.progress.emit(ImportProgress::Completed {
                    generation,
                    imported: summary.imported(),
                    failed: summary.failed.len(),
                });
                if !options.silent && self.inner.settings.auto_import_tokens() {
                    self.spawn_token_pass(&summary);
                }
                ImportOutcome::Completed(summary)
            }
            Err(RunError::Cancelled) => {
                debug!("Import {} cancelled", generation);
                self.inner
                    .progress
                    .emit(ImportProgress::Cancelled { generation });
                ImportOutcome::Cancelled
            }
            Err(RunError::Failed(e)) => {
                self.report_failure(&e, options.silent);
                self.inner.progress.emit(ImportProgress::Failed {
                    generation,
                    error: e.to_string(),
                });
                ImportOutcome::Failed(e)
            }
        };

        self.settle(generation);
        outcome
    }

    async fn execute(
        &self,
        generation: Generation,
        intents: &[ImportIntent],
        cancel: &CancellationToken,
    ) -> Result<ImportSummary, RunError> {
        self.checkpoint(generation, cancel)?;

        let prefer_mpc_art = self.inner.settings.prefer_mpc_art();
        let report = match self.inner.resolver.resolve(intents, prefer_mpc_art, cancel).await {
            Ok(report) => report,
            Err(ProviderError::Cancelled) => return Err(RunError::Cancelled),
            Err(e) => return Err(RunError::Failed(ImportError::Unknown(e.to_string()))),
        };
        self.checkpoint(generation, cancel)?;

        self.inner.progress.emit(ImportProgress::Resolved {
            generation,
            resolved: report.resolved.len(),
            unresolved: report.unresolved.len(),
        });

        if report.resolved.is_empty() {
            return Err(RunError::Failed(ImportError::NothingResolved {
                requested: intents.len(),
            }));
        }

        let batch = build_commit_batch(
            generation,
            &report,
            self.inner.settings.default_back_image_id(),
        );
        let committed = batch.cards.clone();
        self.commit(generation, batch, cancel).await?;

        self.inner.progress.emit(ImportProgress::Committed {
            generation,
            cards: committed.len(),
        });

        Ok(ImportSummary {
            generation,
            requested: intents.len(),
            committed,
            failed: report.unresolved,
        })
    }

    /// Write the batch under the commit lock, only if the run is still current
    async fn commit(
        &self,
        generation: Generation,
        batch: CommitBatch,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            _ = self.inner.commit_lock.acquire() => {}
        }

        let result = match self.checkpoint(generation, cancel) {
            Ok(()) => self
                .inner
                .store
                .commit(batch)
                .await
                .map_err(|e| RunError::Failed(ImportError::Persistence(e))),
            Err(stale) => {
                debug!("Dropping stale commit of import {}", generation);
                Err(stale)
            }
        };

        if let Err(e) = self.inner.commit_lock.release() {
            error!("Commit lock release failed for import {}: {}", generation, e);
            return Err(RunError::Failed(ImportError::Lock(e)));
        }
        result
    }

    fn checkpoint(&self, generation: Generation, cancel: &CancellationToken) -> Result<(), RunError> {
        if cancel.is_cancelled() || !self.is_current(generation) {
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    fn report_success(&self, summary: &ImportSummary, silent: bool) {
        let imported = summary.imported();
        info!(
            "Import {} committed {} card(s), {} failed",
            summary.generation,
            imported,
            summary.failed.len()
        );
        if silent {
            return;
        }

        self.inner.notifier.show_success(&format!(
            "Imported {} {}.",
            imported,
            if imported == 1 { "card" } else { "cards" }
        ));
        if summary.is_partial() {
            self.inner.notifier.show_error(&format!(
                "{} of {} cards could not be found.",
                summary.failed.len(),
                summary.requested
            ));
        }
    }

    fn report_failure(&self, e: &ImportError, silent: bool) {
        error!("Import failed: {}", e);
        if silent {
            return;
        }

        let message = match e {
            ImportError::NothingResolved { requested } => {
                format!("{} of {} cards could not be found.", requested, requested)
            }
            other => format!("Failed to import cards: {}", other),
        };
        self.inner.notifier.show_error(&message);
    }

    fn spawn_token_pass(&self, summary: &ImportSummary) {
        let names: Vec<String> = summary
            .committed
            .iter()
            .filter(|card| !card.is_token)
            .map(|card| card.name.clone())
            .collect();
        if names.is_empty() {
            return;
        }

        let this = self.clone();
        let trigger = summary.generation;
        let task = tokio::spawn(async move { this.inner.tokens.run(&this, trigger, names).await });
        *self
            .inner
            .token_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
    }

    /// Wait for the latest token pass, if one was started. Returns the outcome of
    /// its follow-up import, or `None` when the pass imported nothing.
    pub async fn wait_for_token_pass(&self) -> Option<ImportOutcome> {
        let task = self
            .inner
            .token_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Token pass task failed: {}", e);
                None
            }
        }
    }

    /// Return to idle if `generation` is still the active run
    fn settle(&self, generation: Generation) {
        {
            let mut active = self.lock_active();
            if matches!(*active, Some((g, _)) if g == generation) {
                *active = None;
            }
        }
        let mut state = self.lock_state();
        if *state == (ImportState::Running { generation }) {
            *state = ImportState::Idle;
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<(Generation, CancellationToken)>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ImportState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Make `generation` the active run, cancelling the one it replaces
fn activate(
    active: &mut Option<(Generation, CancellationToken)>,
    generation: Generation,
    signal: Option<&CancellationToken>,
) -> CancellationToken {
    let cancel = match signal {
        Some(signal) => signal.child_token(),
        None => CancellationToken::new(),
    };
    if let Some((previous, token)) = active.replace((generation, cancel.clone())) {
        debug!("Import {} supersedes {}", generation, previous);
        token.cancel();
    }
    cancel
}

/// Turn resolved cards into one commit, in intent order
fn build_commit_batch(
    generation: Generation,
    report: &ResolutionReport,
    default_back: Option<String>,
) -> CommitBatch {
    let mut cards = Vec::with_capacity(report.resolved.len());
    let mut images = Vec::new();
    let mut image_ids = HashSet::new();
    let mut push_image = |image: NewImage| {
        if image_ids.insert(image.id.clone()) {
            images.push(image);
        }
    };

    for resolved in &report.resolved {
        let intent = &resolved.intent;
        let (set_hint, number_hint) = match &intent.source {
            IntentSource::CatalogLookup { set, number }
            | IntentSource::Token { set, number, .. } => (
                set.as_ref().map(|s| s.as_str().to_string()),
                number.clone(),
            ),
            _ => (None, None),
        };

        let mut card = NewCard {
            name: intent.name.clone(),
            quantity: intent.quantity,
            is_token: intent.is_token(),
            category: intent.category.clone(),
            set: set_hint,
            number: number_hint,
            catalog_id: None,
            image_id: None,
            back_image_id: intent.linked_back_image_id.clone(),
            has_built_in_bleed: None,
            overrides: intent.card_overrides.clone(),
        };

        match &resolved.image {
            ResolvedImage::Local { image_id } => {
                card.image_id = Some(image_id.clone());
                if let IntentSource::Manual {
                    has_built_in_bleed, ..
                } = &intent.source
                {
                    card.has_built_in_bleed = *has_built_in_bleed;
                }
            }
            ResolvedImage::Mpc { mpc_id, bytes } => {
                let image_id = format!("mpc:{}", mpc_id);
                push_image(NewImage {
                    id: image_id.clone(),
                    source: ImageSource::Mpc,
                    source_ref: Some(mpc_id.clone()),
                    bytes: Some(bytes.clone()),
                });
                card.image_id = Some(image_id);
                card.has_built_in_bleed = Some(true);
            }
            ResolvedImage::Remote {
                front_url,
                back_url,
            } => {
                let catalog_key = resolved
                    .card
                    .as_ref()
                    .map(|c| c.id.clone())
                    .unwrap_or_else(|| intent.name.to_lowercase());
                let image_id = format!("scryfall:{}", catalog_key);
                push_image(NewImage {
                    id: image_id.clone(),
                    source: ImageSource::Scryfall,
                    source_ref: Some(front_url.clone()),
                    bytes: None,
                });
                card.image_id = Some(image_id);
                card.has_built_in_bleed = Some(false);

                if let Some(back_url) = back_url {
                    let back_id = format!("scryfall:{}:back", catalog_key);
                    push_image(NewImage {
                        id: back_id.clone(),
                        source: ImageSource::Scryfall,
                        source_ref: Some(back_url.clone()),
                        bytes: None,
                    });
                    card.back_image_id.get_or_insert(back_id);
                }

                if let Some(catalog) = &resolved.card {
                    card.name = catalog.name.clone();
                    card.catalog_id = Some(catalog.id.clone());
                    card.set = Some(catalog.set.clone());
                    card.number = Some(catalog.collector_number.clone());
                }
            }
        }

        if card.back_image_id.is_none() {
            card.back_image_id = default_back.clone();
        }
        cards.push(card);
    }

    if !report.unresolved.is_empty() {
        warn!(
            "Import {}: {} intent(s) left out of the commit",
            generation,
            report.unresolved.len()
        );
    }

    CommitBatch {
        generation: generation.value(),
        cards,
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::resolver::ResolvedCard;
    use crate::scryfall::ScryfallCard;

    fn remote_card(name: &str, back: Option<&str>) -> ResolvedCard {
        ResolvedCard {
            index: 0,
            intent: ImportIntent::named(&name.to_lowercase(), 2).unwrap(),
            image: ResolvedImage::Remote {
                front_url: format!("https://img.test/{}.png", name),
                back_url: back.map(str::to_string),
            },
            card: Some(ScryfallCard {
                id: format!("id-{}", name),
                name: name.to_string(),
                set: "cmm".to_string(),
                collector_number: "1".to_string(),
                layout: None,
                type_line: None,
                image_uris: None,
                card_faces: None,
                all_parts: None,
            }),
        }
    }

    #[test]
    fn test_batch_uses_catalog_data_and_default_back() {
        let report = ResolutionReport {
            resolved: vec![remote_card("Sol Ring", None)],
            unresolved: Vec::new(),
        };

        let batch = build_commit_batch(Generation(3), &report, Some("default-back".to_string()));
        assert_eq!(batch.generation, 3);
        let card = &batch.cards[0];
        assert_eq!(card.name, "Sol Ring");
        assert_eq!(card.quantity, 2);
        assert_eq!(card.catalog_id.as_deref(), Some("id-Sol Ring"));
        assert_eq!(card.back_image_id.as_deref(), Some("default-back"));
        assert_eq!(batch.images.len(), 1);
    }

    #[test]
    fn test_double_faced_back_beats_default_and_images_are_shared() {
        let report = ResolutionReport {
            resolved: vec![
                remote_card("Delver of Secrets", Some("https://img.test/back.png")),
                remote_card("Delver of Secrets", Some("https://img.test/back.png")),
            ],
            unresolved: Vec::new(),
        };

        let batch = build_commit_batch(Generation(1), &report, Some("default-back".to_string()));
        assert_eq!(batch.cards.len(), 2);
        assert_eq!(
            batch.cards[0].back_image_id.as_deref(),
            Some("scryfall:id-Delver of Secrets:back")
        );
        assert_eq!(batch.images.len(), 2);
    }

    #[test]
    fn test_linked_back_is_kept() {
        let mut resolved = remote_card("Sol Ring", Some("https://img.test/back.png"));
        resolved.intent = resolved.intent.with_back("custom-back");
        let report = ResolutionReport {
            resolved: vec![resolved],
            unresolved: Vec::new(),
        };

        let batch = build_commit_batch(Generation(1), &report, None);
        assert_eq!(batch.cards[0].back_image_id.as_deref(), Some("custom-back"));
    }
}
