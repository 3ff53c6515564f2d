// Test support utilities for both unit and integration tests

use crate::import::{ArtSource, CardCatalog, ProviderError};
use crate::library::{CardStore, CommitBatch, StoreError, StoredCard};
use crate::mpc::{search_query, AltArtMatches};
use crate::ports::Notifier;
use crate::scryfall::{
    models::ImageUris, CardIdentifier, CollectionResult, PrintsPage, RelatedCard, ScryfallCard,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Catalog card with a predictable id and image
pub fn catalog_card(name: &str, set: &str, number: &str) -> ScryfallCard {
    ScryfallCard {
        id: format!("{}-{}-{}", slug(name), set, number),
        name: name.to_string(),
        set: set.to_string(),
        collector_number: number.to_string(),
        layout: None,
        type_line: None,
        image_uris: Some(ImageUris {
            png: Some(format!("https://img.test/{}/{}.png", set, slug(name))),
            large: None,
            normal: None,
        }),
        card_faces: None,
        all_parts: None,
    }
}

/// Mock card catalog
///
/// Serves cards from memory, optionally after a delay, and records every call.
/// Any collection lookup that includes a name from `failing_on` fails as a whole,
/// and the first `failing_next` lookups fail whatever they ask for.
#[derive(Default)]
pub struct FakeCatalog {
    cards: Vec<ScryfallCard>,
    failing: HashSet<String>,
    fail_next: AtomicUsize,
    delay: Duration,
    collection_batches: Mutex<Vec<usize>>,
    token_batches: Mutex<Vec<usize>>,
    search_calls: AtomicUsize,
    autocomplete_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a card in the default test set
    pub fn with_card(self, name: &str) -> Self {
        let number = (self.cards.len() + 1).to_string();
        self.with_printing(name, "tst", &number)
    }

    pub fn with_printing(mut self, name: &str, set: &str, number: &str) -> Self {
        self.cards.push(catalog_card(name, set, number));
        self
    }

    /// Add a token card
    pub fn with_token(mut self, name: &str) -> Self {
        let mut card = catalog_card(name, "ttst", &(self.cards.len() + 1).to_string());
        card.layout = Some("token".to_string());
        card.type_line = Some(format!("Token Creature {}", name));
        self.cards.push(card);
        self
    }

    /// Add a card that creates the given tokens; the tokens become resolvable too
    /// and the related parts carry their catalog ids
    pub fn with_token_parts(mut self, name: &str, tokens: &[&str]) -> Self {
        let mut card = catalog_card(name, "tst", &(self.cards.len() + 1).to_string());
        let mut parts = Vec::new();
        let is_token_card =
            |c: &ScryfallCard, token: &str| c.name == token && c.layout.as_deref() == Some("token");
        for token in tokens {
            if !self.cards.iter().any(|c| is_token_card(c, token)) {
                self = self.with_token(token);
            }
            if let Some(existing) = self.cards.iter().find(|c| is_token_card(c, token)) {
                parts.push(RelatedCard {
                    id: existing.id.clone(),
                    component: "token".to_string(),
                    name: token.to_string(),
                    type_line: existing.type_line.clone(),
                });
            }
        }
        card.all_parts = Some(parts);
        self.cards.push(card);
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_lowercase());
        self
    }

    /// Fail the next `count` collection lookups with a 503
    pub fn failing_next(self, count: usize) -> Self {
        self.fail_next.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn collection_calls(&self) -> usize {
        self.collection_batches.lock().unwrap().len()
    }

    pub fn collection_batch_sizes(&self) -> Vec<usize> {
        self.collection_batches.lock().unwrap().clone()
    }

    pub fn token_batch_sizes(&self) -> Vec<usize> {
        self.token_batches.lock().unwrap().clone()
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn autocomplete_calls(&self) -> usize {
        self.autocomplete_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn named(&self, name: &str) -> Option<&ScryfallCard> {
        self.cards.iter().find(|card| card.answers_to(name))
    }
}

#[async_trait]
impl CardCatalog for FakeCatalog {
    async fn lookup_collection(
        &self,
        identifiers: &[CardIdentifier],
    ) -> Result<CollectionResult, ProviderError> {
        self.collection_batches
            .lock()
            .unwrap()
            .push(identifiers.len());
        self.pause().await;

        let fails = identifiers.iter().any(|identifier| match identifier {
            CardIdentifier::Name { name } | CardIdentifier::NameSet { name, .. } => {
                self.failing.contains(&name.to_lowercase())
            }
            _ => false,
        });
        if fails {
            return Err(ProviderError::Status(500));
        }
        let transient = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if transient {
            return Err(ProviderError::Status(503));
        }

        let mut result = CollectionResult::default();
        for identifier in identifiers {
            match self.cards.iter().find(|card| identifier.matches(card)) {
                Some(card) => result.found.push(card.clone()),
                None => result.not_found.push(identifier.clone()),
            }
        }
        Ok(result)
    }

    async fn search(&self, query: &str) -> Result<Vec<ScryfallCard>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let query = query.to_lowercase();
        Ok(self
            .cards
            .iter()
            .filter(|card| card.name.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    async fn autocomplete(&self, partial: &str) -> Result<Vec<String>, ProviderError> {
        self.autocomplete_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let partial = partial.to_lowercase();
        Ok(self
            .cards
            .iter()
            .filter(|card| card.name.to_lowercase().starts_with(&partial))
            .map(|card| card.name.clone())
            .collect())
    }

    async fn search_prints(&self, name: &str, page: u32) -> Result<PrintsPage, ProviderError> {
        self.pause().await;
        if page > 1 {
            return Ok(PrintsPage::default());
        }
        Ok(PrintsPage {
            cards: self
                .cards
                .iter()
                .filter(|card| card.answers_to(name))
                .cloned()
                .collect(),
            has_more: false,
        })
    }

    async fn token_parts(&self, names: &[String]) -> Result<Vec<RelatedCard>, ProviderError> {
        self.token_batches.lock().unwrap().push(names.len());
        self.pause().await;
        Ok(names
            .iter()
            .filter_map(|name| self.named(name))
            .flat_map(ScryfallCard::token_parts)
            .collect())
    }
}

/// Mock alternate-art source
#[derive(Default)]
pub struct FakeArtSource {
    images: HashMap<String, Vec<u8>>,
    alt_art: AltArtMatches,
    delay: Duration,
    image_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl FakeArtSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, mpc_id: &str, bytes: &[u8]) -> Self {
        self.images.insert(mpc_id.to_string(), bytes.to_vec());
        self
    }

    /// Register search results for a card name
    pub fn with_alt_art(mut self, name: &str, ids: &[&str]) -> Self {
        self.alt_art.insert(
            search_query(name),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtSource for FakeArtSource {
    async fn search_alt_art(&self, names: &[String]) -> Result<AltArtMatches, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(names
            .iter()
            .map(|name| search_query(name))
            .filter_map(|query| {
                self.alt_art
                    .get(&query)
                    .map(|ids| (query.clone(), ids.clone()))
            })
            .collect())
    }

    async fn fetch_image(&self, mpc_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.images
            .get(mpc_id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }
}

/// In-memory card store
#[derive(Default)]
pub struct MemoryCardStore {
    cards: Mutex<Vec<StoredCard>>,
    batches: Mutex<Vec<CommitBatch>>,
    fail_commits: AtomicBool,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn cards(&self) -> Vec<StoredCard> {
        self.cards.lock().unwrap().clone()
    }

    pub fn card_names(&self) -> Vec<String> {
        self.cards().into_iter().map(|card| card.name).collect()
    }

    pub fn batches(&self) -> Vec<CommitBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("disk full".to_string()));
        }

        let now = Utc::now();
        let mut cards = self.cards.lock().unwrap();
        for card in &batch.cards {
            cards.push(StoredCard {
                id: Uuid::new_v4().to_string(),
                name: card.name.clone(),
                quantity: card.quantity,
                is_token: card.is_token,
                category: card.category.clone(),
                set: card.set.clone(),
                number: card.number.clone(),
                catalog_id: card.catalog_id.clone(),
                image_id: card.image_id.clone(),
                back_image_id: card.back_image_id.clone(),
                has_built_in_bleed: card.has_built_in_bleed,
                overrides: card.overrides.clone(),
                generation: batch.generation,
                created_at: now,
            });
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    async fn list_cards(&self) -> Result<Vec<StoredCard>, StoreError> {
        Ok(self.cards())
    }

    async fn has_card(&self, name: &str, is_token: bool) -> Result<bool, StoreError> {
        Ok(self
            .cards
            .lock()
            .unwrap()
            .iter()
            .any(|card| card.is_token == is_token && card.name.eq_ignore_ascii_case(name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Success(String),
    Error(String),
}

/// Notifier that remembers what it was asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error(text) => Some(text),
                Notification::Success(_) => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Success(text) => Some(text),
                Notification::Error(_) => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_success(&self, message: &str) {
        self.shown
            .lock()
            .unwrap()
            .push(Notification::Success(message.to_string()));
    }

    fn show_error(&self, message: &str) {
        self.shown
            .lock()
            .unwrap()
            .push(Notification::Error(message.to_string()));
    }
}
