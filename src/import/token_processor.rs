// # Token Post-Processor
//
// After a successful import, looks up the tokens the imported cards create and
// imports the ones not already in the library as a silent follow-up run.

use crate::import::handle::{Generation, ImportOutcome, ProcessOptions};
use crate::import::service::ImportOrchestrator;
use crate::import::types::{ImportIntent, IntentSource};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TokenPostProcessor {
    running: AtomicBool,
}

impl Default for TokenPostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenPostProcessor {
    pub fn new() -> Self {
        TokenPostProcessor {
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Import tokens for `card_names`, committed by run `trigger`.
    ///
    /// Returns `None` when the pass was skipped: another pass is running, a newer
    /// run started in the meantime, or there is nothing new to import.
    pub async fn run(
        &self,
        orchestrator: &ImportOrchestrator,
        trigger: Generation,
        card_names: Vec<String>,
    ) -> Option<ImportOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Token pass already running, skipping for import {}", trigger);
            return None;
        }

        let outcome = self.import_tokens(orchestrator, trigger, card_names).await;
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn import_tokens(
        &self,
        orchestrator: &ImportOrchestrator,
        trigger: Generation,
        card_names: Vec<String>,
    ) -> Option<ImportOutcome> {
        let cancel = CancellationToken::new();
        let parts = match orchestrator
            .resolver()
            .token_parts(&card_names, &cancel)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Token lookup after import {} failed: {}", trigger, e);
                return None;
            }
        };

        let mut seen = HashSet::new();
        let mut intents = Vec::new();
        for part in parts {
            if !seen.insert(part.name.to_lowercase()) {
                continue;
            }
            match orchestrator.store().has_card(&part.name, true).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not check library for token {:?}: {}", part.name, e);
                    continue;
                }
            }

            let source = IntentSource::Token {
                set: None,
                number: None,
                catalog_id: Some(part.id.clone()),
            };
            match ImportIntent::new(&part.name, 1, source) {
                Ok(intent) => intents.push(intent),
                Err(e) => warn!("Skipping token {:?}: {}", part.name, e),
            }
        }

        if intents.is_empty() {
            debug!("No new tokens for import {}", trigger);
            return None;
        }

        // A user import that started meanwhile must not be superseded by this pass
        let count = intents.len();
        let Some(run) = orchestrator.start_after(trigger, intents, ProcessOptions::silent()) else {
            debug!("Import {} is stale, skipping its token pass", trigger);
            return None;
        };

        info!("Importing {} token(s) for import {}", count, trigger);
        Some(run.outcome().await)
    }
}
