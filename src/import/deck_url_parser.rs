// # Deck-builder URL import
//
// Recognizes public deck URLs from supported deck builders, fetches the deck once
// and maps every entry to an intent. Maybeboard-style categories are kept and
// tagged; token categories produce token intents.

use crate::import::types::{ImportIntent, IntentSource, SetCode};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DeckUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported deck site: {0}")]
    Unsupported(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Deck not found or not public")]
    NotFound,
    #[error("Deck site returned status {0}")]
    Status(u16),
}

/// Supported deck builders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckProvider {
    Archidekt { deck_id: String },
    Moxfield { deck_id: String },
}

/// One entry of a remote deck, before it becomes an intent
#[derive(Debug, Clone, PartialEq)]
pub struct DeckCard {
    pub quantity: u32,
    pub name: String,
    pub set: Option<String>,
    pub number: Option<String>,
    pub category: Option<String>,
}

/// Work out which deck builder a URL points at
pub fn detect_provider(url: &str) -> Result<DeckProvider, DeckUrlError> {
    let parsed = Url::parse(url.trim()).map_err(|e| DeckUrlError::InvalidUrl(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DeckUrlError::InvalidUrl(url.to_string()))?
        .trim_start_matches("www.")
        .to_lowercase();

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let deck_id = match segments.as_slice() {
        ["decks", id, ..] => id.to_string(),
        _ => return Err(DeckUrlError::Unsupported(url.to_string())),
    };

    match host.as_str() {
        "archidekt.com" => Ok(DeckProvider::Archidekt { deck_id }),
        "moxfield.com" => Ok(DeckProvider::Moxfield { deck_id }),
        _ => Err(DeckUrlError::Unsupported(host)),
    }
}

/// Map remote deck entries to intents
pub fn deck_cards_to_intents(cards: &[DeckCard]) -> Vec<ImportIntent> {
    cards
        .iter()
        .filter_map(|card| {
            let set = card.set.as_deref().filter(|s| !s.is_empty()).map(SetCode::new);
            let number = card.number.clone().filter(|n| !n.is_empty());
            let is_token = card
                .category
                .as_deref()
                .is_some_and(|category| category.to_lowercase().contains("token"));

            let source = if is_token {
                IntentSource::Token {
                    set,
                    number,
                    catalog_id: None,
                }
            } else {
                IntentSource::CatalogLookup { set, number }
            };

            match ImportIntent::new(&card.name, card.quantity.max(1), source) {
                Ok(intent) => Some(match &card.category {
                    Some(category) => intent.with_category(category.clone()),
                    None => intent,
                }),
                Err(e) => {
                    warn!("Skipping deck entry {:?}: {}", card.name, e);
                    None
                }
            }
        })
        .collect()
}

/// Archidekt deck payload
#[derive(Debug, Deserialize)]
struct ArchidektDeck {
    #[serde(default)]
    cards: Vec<ArchidektEntry>,
}

#[derive(Debug, Deserialize)]
struct ArchidektEntry {
    quantity: u32,
    #[serde(default)]
    categories: Option<Vec<String>>,
    card: ArchidektCard,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchidektCard {
    #[serde(default)]
    collector_number: Option<String>,
    #[serde(default)]
    edition: Option<ArchidektEdition>,
    oracle_card: ArchidektOracleCard,
}

#[derive(Debug, Deserialize)]
struct ArchidektEdition {
    editioncode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArchidektOracleCard {
    name: String,
}

/// Moxfield deck payload
#[derive(Debug, Deserialize)]
struct MoxfieldDeck {
    #[serde(default)]
    boards: BTreeMap<String, MoxfieldBoard>,
}

#[derive(Debug, Deserialize)]
struct MoxfieldBoard {
    #[serde(default)]
    cards: BTreeMap<String, MoxfieldEntry>,
}

#[derive(Debug, Deserialize)]
struct MoxfieldEntry {
    quantity: u32,
    card: MoxfieldCard,
}

#[derive(Debug, Deserialize)]
struct MoxfieldCard {
    name: String,
    #[serde(default)]
    set: Option<String>,
    #[serde(default)]
    cn: Option<String>,
}

fn archidekt_cards(deck: ArchidektDeck) -> Vec<DeckCard> {
    deck.cards
        .into_iter()
        .map(|entry| DeckCard {
            quantity: entry.quantity,
            name: entry.card.oracle_card.name,
            set: entry.card.edition.and_then(|edition| edition.editioncode),
            number: entry.card.collector_number,
            category: entry
                .categories
                .and_then(|categories| categories.into_iter().next()),
        })
        .collect()
}

fn moxfield_cards(deck: MoxfieldDeck) -> Vec<DeckCard> {
    let mut cards = Vec::new();
    for (board, contents) in deck.boards {
        let category = match board.as_str() {
            "mainboard" => None,
            "commanders" => Some("Commander".to_string()),
            "companions" => Some("Companion".to_string()),
            "sideboard" => Some("Sideboard".to_string()),
            "maybeboard" => Some("Maybeboard".to_string()),
            "tokens" => Some("Tokens".to_string()),
            other => Some(other.to_string()),
        };

        for entry in contents.cards.into_values() {
            cards.push(DeckCard {
                quantity: entry.quantity,
                name: entry.card.name,
                set: entry.card.set,
                number: entry.card.cn,
                category: category.clone(),
            });
        }
    }
    cards
}

/// Fetches decks from supported deck builders
#[derive(Clone)]
pub struct DeckUrlImporter {
    client: Client,
    archidekt_base: String,
    moxfield_base: String,
}

impl DeckUrlImporter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            archidekt_base: "https://archidekt.com/api".to_string(),
            moxfield_base: "https://api2.moxfield.com/v3".to_string(),
        }
    }

    /// Point the importer at different API hosts
    pub fn with_base_urls(mut self, archidekt_base: &str, moxfield_base: &str) -> Self {
        self.archidekt_base = archidekt_base.trim_end_matches('/').to_string();
        self.moxfield_base = moxfield_base.trim_end_matches('/').to_string();
        self
    }

    /// Fetch the deck behind `url` and turn it into intents (one request)
    pub async fn fetch_intents(&self, url: &str) -> Result<Vec<ImportIntent>, DeckUrlError> {
        let provider = detect_provider(url)?;
        let cards = self.fetch_cards(&provider).await?;
        info!("Fetched {} deck entries from {:?}", cards.len(), provider);
        Ok(deck_cards_to_intents(&cards))
    }

    pub async fn fetch_cards(&self, provider: &DeckProvider) -> Result<Vec<DeckCard>, DeckUrlError> {
        let request_url = match provider {
            DeckProvider::Archidekt { deck_id } => format!(
                "{}/decks/{}/",
                self.archidekt_base,
                urlencoding::encode(deck_id)
            ),
            DeckProvider::Moxfield { deck_id } => format!(
                "{}/decks/all/{}",
                self.moxfield_base,
                urlencoding::encode(deck_id)
            ),
        };
        debug!("Deck request: {}", request_url);

        let response = self
            .client
            .get(&request_url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == 404 || status == 403 {
            return Err(DeckUrlError::NotFound);
        } else if !status.is_success() {
            return Err(DeckUrlError::Status(status.as_u16()));
        }

        Ok(match provider {
            DeckProvider::Archidekt { .. } => archidekt_cards(response.json().await?),
            DeckProvider::Moxfield { .. } => moxfield_cards(response.json().await?),
        })
    }
}
