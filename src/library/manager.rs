use crate::db::{Database, DbCard, DbImage};
use crate::import::types::CardOverrides;
use crate::library::{CardStore, CommitBatch, StoreError, StoredCard};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// The library manager for card persistence
///
/// Handles:
/// - Turning commit batches into database rows in one transaction
/// - Reading the working card list back for display and token enrichment
#[derive(Debug, Clone)]
pub struct LibraryManager {
    database: Database,
}

impl LibraryManager {
    /// Create a new library manager
    pub fn new(database: Database) -> Self {
        LibraryManager { database }
    }

    /// Open (or create) the library database at `database_path`
    pub async fn open(database_path: &str) -> Result<Self, StoreError> {
        Ok(Self::new(Database::new(database_path).await?))
    }

    /// Remove everything committed by one import run
    pub async fn remove_generation(&self, generation: u64) -> Result<u64, StoreError> {
        Ok(self.database.delete_generation(generation as i64).await?)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl CardStore for LibraryManager {
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        let now = Utc::now();

        let images: Vec<DbImage> = batch
            .images
            .iter()
            .map(|image| DbImage {
                id: image.id.clone(),
                source: image.source,
                source_ref: image.source_ref.clone(),
                bytes: image.bytes.as_ref().map(|bytes| bytes.as_ref().clone()),
                created_at: now,
            })
            .collect();

        let mut cards = Vec::with_capacity(batch.cards.len());
        for (position, card) in batch.cards.iter().enumerate() {
            let overrides_json = card
                .overrides
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            cards.push(DbCard {
                id: Uuid::new_v4().to_string(),
                name: card.name.clone(),
                quantity: i64::from(card.quantity),
                is_token: card.is_token,
                category: card.category.clone(),
                set_code: card.set.clone(),
                collector_number: card.number.clone(),
                catalog_id: card.catalog_id.clone(),
                image_id: card.image_id.clone(),
                back_image_id: card.back_image_id.clone(),
                has_built_in_bleed: card.has_built_in_bleed,
                overrides_json,
                generation: batch.generation as i64,
                position: position as i64,
                created_at: now,
            });
        }

        self.database.insert_cards_with_images(&cards, &images).await?;
        info!(
            "Committed {} card(s) for import generation {}",
            cards.len(),
            batch.generation
        );
        Ok(())
    }

    async fn list_cards(&self) -> Result<Vec<StoredCard>, StoreError> {
        let rows = self.database.get_cards().await?;
        rows.into_iter()
            .map(|row| -> Result<StoredCard, StoreError> {
                let overrides: Option<CardOverrides> = row
                    .overrides_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                Ok(StoredCard {
                    id: row.id,
                    name: row.name,
                    quantity: u32::try_from(row.quantity).unwrap_or(1),
                    is_token: row.is_token,
                    category: row.category,
                    set: row.set_code,
                    number: row.collector_number,
                    catalog_id: row.catalog_id,
                    image_id: row.image_id,
                    back_image_id: row.back_image_id,
                    has_built_in_bleed: row.has_built_in_bleed,
                    overrides,
                    generation: u64::try_from(row.generation).unwrap_or_default(),
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn has_card(&self, name: &str, is_token: bool) -> Result<bool, StoreError> {
        Ok(self.database.has_card(name, is_token).await?)
    }
}
