// # Library
//
// The persistent working card list. The orchestrator only sees the `CardStore`
// port; `LibraryManager` implements it on top of the SQLite database.

mod manager;

pub use manager::LibraryManager;

use crate::db::ImageSource;
use crate::import::types::CardOverrides;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Commit rejected: {0}")]
    Rejected(String),
}

/// Image written alongside the cards that use it
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub id: String,
    pub source: ImageSource,
    /// Alternate-art id or catalog URL
    pub source_ref: Option<String>,
    pub bytes: Option<Arc<Vec<u8>>>,
}

/// Card to add to the working list
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub name: String,
    pub quantity: u32,
    pub is_token: bool,
    pub category: Option<String>,
    pub set: Option<String>,
    pub number: Option<String>,
    pub catalog_id: Option<String>,
    pub image_id: Option<String>,
    pub back_image_id: Option<String>,
    pub has_built_in_bleed: Option<bool>,
    pub overrides: Option<CardOverrides>,
}

/// Everything one import run writes, applied atomically
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    pub generation: u64,
    /// In original intent order
    pub cards: Vec<NewCard>,
    pub images: Vec<NewImage>,
}

/// A card as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCard {
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub is_token: bool,
    pub category: Option<String>,
    pub set: Option<String>,
    pub number: Option<String>,
    pub catalog_id: Option<String>,
    pub image_id: Option<String>,
    pub back_image_id: Option<String>,
    pub has_built_in_bleed: Option<bool>,
    pub overrides: Option<CardOverrides>,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

/// Persistence port for imported cards
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Write one batch; either every card and image is stored or none is
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError>;

    /// Every stored card in commit order
    async fn list_cards(&self) -> Result<Vec<StoredCard>, StoreError>;

    /// Whether a card with this name (case-insensitive) and token flag exists
    async fn has_card(&self, name: &str, is_token: bool) -> Result<bool, StoreError>;
}
