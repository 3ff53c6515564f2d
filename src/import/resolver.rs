// # Resolver
//
// Turns intents into artwork references using the external providers:
//
//   Manual            -> local image, no network
//   Mpc               -> raw image download, bounded concurrency
//   Auto + prefer art -> alternate-art search, misses fall back to the catalog
//   Catalog / Token   -> collection lookup, chunked and paced
//
// Every provider request goes through one request coalescer, so identical
// requests from overlapping runs share a single call. Coalesced requests run as
// their own tasks: a cancelled run stops waiting on them but never tears them down.

use crate::batching::{chunked, BatchLimits, RateLimiter};
use crate::cache::{CacheConfig, CacheStats, RequestCache};
use crate::import::types::{ImportIntent, IntentSource, SourcePreference};
use crate::mpc::{search_query, AltArtMatches};
use crate::scryfall::{CardIdentifier, CollectionResult, PrintsPage, RelatedCard, ScryfallCard};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pages walked when listing alternate prints
const MAX_PRINT_PAGES: u32 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Provider returned status {0}")]
    Status(u16),
    #[error("API rate limit exceeded")]
    RateLimited,
    #[error("Not found")]
    NotFound,
    #[error("Could not decode provider response: {0}")]
    Decode(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(e: tokio::task::JoinError) -> Self {
        ProviderError::Http(format!("provider task failed: {}", e))
    }
}

/// Canonical card catalog
#[async_trait]
pub trait CardCatalog: Send + Sync {
    /// Look up many cards at once; unmatched identifiers come back in `not_found`
    async fn lookup_collection(
        &self,
        identifiers: &[CardIdentifier],
    ) -> Result<CollectionResult, ProviderError>;

    async fn search(&self, query: &str) -> Result<Vec<ScryfallCard>, ProviderError>;

    async fn autocomplete(&self, partial: &str) -> Result<Vec<String>, ProviderError>;

    /// One page (1-based) of every printing of the card named `name`
    async fn search_prints(&self, name: &str, page: u32) -> Result<PrintsPage, ProviderError>;

    /// Tokens created by any of the named cards
    async fn token_parts(&self, names: &[String]) -> Result<Vec<RelatedCard>, ProviderError>;
}

/// Alternate-art index and its image host
#[async_trait]
pub trait ArtSource: Send + Sync {
    /// Image ids keyed by normalized query (see `mpc::search_query`)
    async fn search_alt_art(&self, names: &[String]) -> Result<AltArtMatches, ProviderError>;

    async fn fetch_image(&self, mpc_id: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Where a resolved card's artwork lives
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedImage {
    Local {
        image_id: String,
    },
    Mpc {
        mpc_id: String,
        bytes: Arc<Vec<u8>>,
    },
    Remote {
        front_url: String,
        back_url: Option<String>,
    },
}

/// An intent paired with its artwork
#[derive(Debug, Clone)]
pub struct ResolvedCard {
    /// Position of the intent in the resolved input
    pub index: usize,
    pub intent: ImportIntent,
    pub image: ResolvedImage,
    /// Catalog data, when the catalog resolved the card
    pub card: Option<ScryfallCard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub resolved: Vec<ResolvedCard>,
    pub unresolved: Vec<Unresolved>,
}

impl ResolutionReport {
    pub fn total(&self) -> usize {
        self.resolved.len() + self.unresolved.len()
    }

    fn sort_by_index(&mut self) {
        self.resolved.sort_by_key(|card| card.index);
        self.unresolved.sort_by_key(|item| item.index);
    }
}

/// Coalesced provider payloads, one table for every provider
#[derive(Clone)]
enum Cached {
    Collection(CollectionResult),
    Cards(Vec<ScryfallCard>),
    Names(Vec<String>),
    Prints(PrintsPage),
    Tokens(Vec<RelatedCard>),
    AltArt(AltArtMatches),
    Image(Arc<Vec<u8>>),
}

fn unexpected(kind: &str) -> ProviderError {
    ProviderError::Decode(format!("coalesced entry does not hold {}", kind))
}

/// Identifier a catalog-backed intent is looked up by
fn identifier_for(intent: &ImportIntent) -> CardIdentifier {
    let name = CardIdentifier::Name {
        name: intent.name.clone(),
    };
    match &intent.source {
        IntentSource::Token {
            catalog_id: Some(id),
            ..
        } => CardIdentifier::Id { id: id.clone() },
        IntentSource::CatalogLookup { set, number } | IntentSource::Token { set, number, .. } => {
            match (set, number) {
                (Some(set), Some(number)) => CardIdentifier::SetNumber {
                    set: set.as_str().to_string(),
                    collector_number: number.clone(),
                },
                (Some(set), None) => CardIdentifier::NameSet {
                    name: intent.name.clone(),
                    set: set.as_str().to_string(),
                },
                _ => name,
            }
        }
        _ => name,
    }
}

pub struct Resolver {
    catalog: Arc<dyn CardCatalog>,
    art: Arc<dyn ArtSource>,
    limits: BatchLimits,
    catalog_limiter: Arc<RateLimiter>,
    /// Stops coalesced background requests on shutdown
    background: CancellationToken,
    cache: RequestCache<Result<Cached, ProviderError>>,
}

impl Resolver {
    pub fn new(
        catalog: Arc<dyn CardCatalog>,
        art: Arc<dyn ArtSource>,
        limits: BatchLimits,
        cache_config: CacheConfig,
    ) -> Self {
        let catalog_limiter = Arc::new(RateLimiter::new("catalog", limits.catalog_delay));
        Resolver {
            catalog,
            art,
            limits,
            catalog_limiter,
            background: CancellationToken::new(),
            cache: RequestCache::new(cache_config),
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Abort coalesced requests that are still running in the background
    pub fn shutdown(&self) {
        self.background.cancel();
    }

    /// Resolve every intent. Provider failures become `Unresolved` entries; only
    /// cancellation is returned as an error.
    pub async fn resolve(
        &self,
        intents: &[ImportIntent],
        prefer_mpc_art: bool,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, ProviderError> {
        let mut report = ResolutionReport::default();
        let mut art_work: Vec<(usize, String)> = Vec::new();
        let mut catalog_work: Vec<usize> = Vec::new();
        let mut auto_work: Vec<usize> = Vec::new();

        for (index, intent) in intents.iter().enumerate() {
            match (&intent.source, intent.source_preference()) {
                (IntentSource::Manual { local_image_id, .. }, _) => {
                    report.resolved.push(ResolvedCard {
                        index,
                        intent: intent.clone(),
                        image: ResolvedImage::Local {
                            image_id: local_image_id.clone(),
                        },
                        card: None,
                    })
                }
                (IntentSource::Mpc { mpc_id, .. }, _) => art_work.push((index, mpc_id.clone())),
                (_, SourcePreference::Auto) if prefer_mpc_art => auto_work.push(index),
                _ => catalog_work.push(index),
            }
        }

        if !auto_work.is_empty() {
            let names: Vec<String> = auto_work.iter().map(|&i| intents[i].name.clone()).collect();
            let matches = self.alt_art(&names, cancel).await?;
            for index in auto_work {
                let best = matches
                    .get(&search_query(&intents[index].name))
                    .and_then(|ids| ids.first());
                match best {
                    Some(mpc_id) => art_work.push((index, mpc_id.clone())),
                    None => catalog_work.push(index),
                }
            }
        }

        debug!(
            "Resolving {} intent(s): {} local, {} art, {} catalog",
            intents.len(),
            report.resolved.len(),
            art_work.len(),
            catalog_work.len()
        );

        let (art, catalog) = tokio::join!(
            self.resolve_art(intents, art_work, cancel),
            self.resolve_catalog(intents, catalog_work, cancel)
        );
        for partial in [art?, catalog?] {
            report.resolved.extend(partial.resolved);
            report.unresolved.extend(partial.unresolved);
        }

        report.sort_by_index();
        info!(
            "Resolved {}/{} intent(s)",
            report.resolved.len(),
            report.total()
        );
        Ok(report)
    }

    async fn resolve_art(
        &self,
        intents: &[ImportIntent],
        work: Vec<(usize, String)>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, ProviderError> {
        let downloads: Vec<_> = stream::iter(work)
            .map(|(index, mpc_id)| async move {
                let bytes = self.image(&mpc_id, cancel).await;
                (index, mpc_id, bytes)
            })
            .buffer_unordered(self.limits.image_concurrency.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let mut report = ResolutionReport::default();
        for (index, mpc_id, bytes) in downloads {
            let intent = &intents[index];
            match bytes {
                Ok(bytes) => report.resolved.push(ResolvedCard {
                    index,
                    intent: intent.clone(),
                    image: ResolvedImage::Mpc { mpc_id, bytes },
                    card: None,
                }),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    warn!("Art image {} for {:?} failed: {}", mpc_id, intent.name, e);
                    report.unresolved.push(Unresolved {
                        index,
                        name: intent.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn resolve_catalog(
        &self,
        intents: &[ImportIntent],
        work: Vec<usize>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, ProviderError> {
        let work: Vec<(usize, CardIdentifier)> = work
            .into_iter()
            .map(|index| (index, identifier_for(&intents[index])))
            .collect();

        let mut report = ResolutionReport::default();
        for chunk in chunked(&work, self.limits.collection_chunk) {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let identifiers: Vec<CardIdentifier> = chunk.iter().map(|(_, id)| id.clone()).collect();
            let found = match self.collection(identifiers, cancel).await {
                Ok(result) => result.found,
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    warn!("Collection lookup of {} card(s) failed: {}", chunk.len(), e);
                    report
                        .unresolved
                        .extend(chunk.iter().map(|(index, _)| Unresolved {
                            index: *index,
                            name: intents[*index].name.clone(),
                            reason: e.to_string(),
                        }));
                    continue;
                }
            };

            for (index, identifier) in chunk {
                let intent = &intents[index];
                let card = found.iter().find(|card| identifier.matches(card));
                match card.and_then(|card| card.front_image_url().map(|url| (card, url))) {
                    Some((card, front_url)) => report.resolved.push(ResolvedCard {
                        index,
                        intent: intent.clone(),
                        image: ResolvedImage::Remote {
                            front_url,
                            back_url: card.back_image_url(),
                        },
                        card: Some(card.clone()),
                    }),
                    None => report.unresolved.push(Unresolved {
                        index,
                        name: intent.name.clone(),
                        reason: match card {
                            Some(_) => "no image available".to_string(),
                            None => "not found".to_string(),
                        },
                    }),
                }
            }
        }
        Ok(report)
    }

    /// Alternate-art search in chunks; a failed chunk only loses its matches
    async fn alt_art(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<AltArtMatches, ProviderError> {
        let mut matches = AltArtMatches::new();
        for chunk in chunked(names, self.limits.alt_art_chunk) {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let mut queries: Vec<String> = chunk.iter().map(|name| search_query(name)).collect();
            queries.sort();
            queries.dedup();
            let key = format!("mpc:search:{}", queries.join("|"));
            let chunk_len = chunk.len();

            let art = self.art.clone();
            let request = async move { art.search_alt_art(&chunk).await.map(Cached::AltArt) };
            match self.coalesced(key, cancel, request).await {
                Ok(Cached::AltArt(found)) => matches.extend(found),
                Ok(_) => warn!("{}", unexpected("alternate art")),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => warn!(
                    "Alternate art search for {} name(s) failed, using the catalog: {}",
                    chunk_len, e
                ),
            }
        }
        Ok(matches)
    }

    async fn image(
        &self,
        mpc_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<u8>>, ProviderError> {
        let art = self.art.clone();
        let id = mpc_id.to_string();
        let request = async move {
            art.fetch_image(&id)
                .await
                .map(|bytes| Cached::Image(Arc::new(bytes)))
        };
        match self.coalesced(format!("mpc:image:{}", mpc_id), cancel, request).await? {
            Cached::Image(bytes) => Ok(bytes),
            _ => Err(unexpected("an image")),
        }
    }

    async fn collection(
        &self,
        identifiers: Vec<CardIdentifier>,
        cancel: &CancellationToken,
    ) -> Result<CollectionResult, ProviderError> {
        let key = format!(
            "scryfall:collection:{}",
            identifiers
                .iter()
                .map(CardIdentifier::cache_key)
                .collect::<Vec<_>>()
                .join("|")
        );
        let request = self.paced(move |catalog| async move {
            catalog
                .lookup_collection(&identifiers)
                .await
                .map(Cached::Collection)
        });
        match self.coalesced(key, cancel, request).await? {
            Cached::Collection(result) => Ok(result),
            _ => Err(unexpected("a collection")),
        }
    }

    /// Free-text catalog search
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScryfallCard>, ProviderError> {
        let key = format!("scryfall:search:{}", query.trim().to_lowercase());
        let query = query.trim().to_string();
        let request = self.paced(move |catalog| async move {
            catalog.search(&query).await.map(Cached::Cards)
        });
        match self.coalesced(key, cancel, request).await? {
            Cached::Cards(cards) => Ok(cards),
            _ => Err(unexpected("search results")),
        }
    }

    pub async fn autocomplete(
        &self,
        partial: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProviderError> {
        let partial = partial.trim().to_string();
        if partial.is_empty() {
            return Ok(Vec::new());
        }

        let key = format!("scryfall:autocomplete:{}", partial.to_lowercase());
        let request = self.paced(move |catalog| async move {
            catalog.autocomplete(&partial).await.map(Cached::Names)
        });
        match self.coalesced(key, cancel, request).await? {
            Cached::Names(names) => Ok(names),
            _ => Err(unexpected("autocomplete names")),
        }
    }

    /// Every printing of `name`, walking the catalog's pagination
    pub async fn alternate_prints(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScryfallCard>, ProviderError> {
        let mut prints = Vec::new();
        for page in 1..=MAX_PRINT_PAGES {
            let key = format!("scryfall:prints:{}:{}", name.trim().to_lowercase(), page);
            let owned_name = name.trim().to_string();
            let request = self.paced(move |catalog| async move {
                catalog
                    .search_prints(&owned_name, page)
                    .await
                    .map(Cached::Prints)
            });

            let page = match self.coalesced(key, cancel, request).await? {
                Cached::Prints(page) => page,
                _ => return Err(unexpected("a prints page")),
            };
            prints.extend(page.cards);
            if !page.has_more {
                break;
            }
        }
        Ok(prints)
    }

    /// Tokens created by the named cards, de-duplicated by catalog id. Failed
    /// chunks are logged and skipped.
    pub async fn token_parts(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedCard>, ProviderError> {
        let mut unique: Vec<String> = Vec::new();
        let mut seen_names = HashSet::new();
        for name in names {
            if seen_names.insert(name.to_lowercase()) {
                unique.push(name.clone());
            }
        }

        let mut seen_ids = HashSet::new();
        let mut parts = Vec::new();
        for chunk in chunked(&unique, self.limits.token_chunk) {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let key = format!(
                "scryfall:tokens:{}",
                chunk
                    .iter()
                    .map(|name| name.to_lowercase())
                    .collect::<Vec<_>>()
                    .join("|")
            );
            let chunk_len = chunk.len();
            let request = self.paced(move |catalog| async move {
                catalog.token_parts(&chunk).await.map(Cached::Tokens)
            });

            match self.coalesced(key, cancel, request).await {
                Ok(Cached::Tokens(found)) => parts.extend(
                    found
                        .into_iter()
                        .filter(|part: &RelatedCard| seen_ids.insert(part.id.clone())),
                ),
                Ok(_) => warn!("{}", unexpected("token parts")),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => warn!("Token lookup for {} card(s) failed: {}", chunk_len, e),
            }
        }
        Ok(parts)
    }

    /// Wrap a catalog call so it waits for its turn on the catalog rate limiter
    fn paced<F, Fut>(&self, call: F) -> impl Future<Output = Result<Cached, ProviderError>> + Send + 'static
    where
        F: FnOnce(Arc<dyn CardCatalog>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Cached, ProviderError>> + Send + 'static,
    {
        let catalog = self.catalog.clone();
        let limiter = self.catalog_limiter.clone();
        let background = self.background.clone();
        async move {
            limiter
                .run(&background, || call(catalog))
                .await
                .unwrap_or(Err(ProviderError::Cancelled))
        }
    }

    /// Share `request` under `key`, waiting for it unless `cancel` fires first.
    async fn coalesced<Fut>(
        &self,
        key: String,
        cancel: &CancellationToken,
        request: Fut,
    ) -> Result<Cached, ProviderError>
    where
        Fut: Future<Output = Result<Cached, ProviderError>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let lookup = self.cache.get_result(&key, move || request);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = lookup => result,
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
