use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::db::models::*;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Images table (content or reference, shared between cards)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                source_ref TEXT,
                bytes BLOB,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Cards table (the working card list)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                is_token BOOLEAN NOT NULL DEFAULT FALSE,
                category TEXT,
                set_code TEXT,
                collector_number TEXT,
                catalog_id TEXT,
                image_id TEXT,
                back_image_id TEXT,
                has_built_in_bleed BOOLEAN,
                overrides_json TEXT,
                generation INTEGER NOT NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_name ON cards (name COLLATE NOCASE)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert images and cards of one import run in a single transaction.
    ///
    /// Images already present are kept as they are.
    pub async fn insert_cards_with_images(
        &self,
        cards: &[DbCard],
        images: &[DbImage],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for image in images {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO images (
                    id, source, source_ref, bytes, created_at
                ) VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&image.id)
            .bind(image.source.as_str())
            .bind(&image.source_ref)
            .bind(&image.bytes)
            .bind(image.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for card in cards {
            sqlx::query(
                r#"
                INSERT INTO cards (
                    id, name, quantity, is_token, category, set_code, collector_number,
                    catalog_id, image_id, back_image_id, has_built_in_bleed, overrides_json,
                    generation, position, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&card.id)
            .bind(&card.name)
            .bind(card.quantity)
            .bind(card.is_token)
            .bind(&card.category)
            .bind(&card.set_code)
            .bind(&card.collector_number)
            .bind(&card.catalog_id)
            .bind(&card.image_id)
            .bind(&card.back_image_id)
            .bind(card.has_built_in_bleed)
            .bind(&card.overrides_json)
            .bind(card.generation)
            .bind(card.position)
            .bind(card.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} card(s) and {} image(s)", cards.len(), images.len());
        Ok(())
    }

    /// All cards in commit order
    pub async fn get_cards(&self) -> Result<Vec<DbCard>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT 
                id, name, quantity, is_token, category, set_code, collector_number,
                catalog_id, image_id, back_image_id, has_built_in_bleed, overrides_json,
                generation, position, created_at
            FROM cards
            ORDER BY generation, position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(card_from_row).collect()
    }

    /// Whether a card with this name (case-insensitive) and token flag exists
    pub async fn has_card(&self, name: &str, is_token: bool) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM cards WHERE name = ? COLLATE NOCASE AND is_token = ?",
        )
        .bind(name)
        .bind(is_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Get image by ID
    pub async fn get_image(&self, image_id: &str) -> Result<Option<DbImage>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, source, source_ref, bytes, created_at FROM images WHERE id = ?",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let source: String = row.get("source");
        Ok(Some(DbImage {
            id: row.get("id"),
            source: ImageSource::parse(&source).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown image source {:?}", source).into())
            })?,
            source_ref: row.get("source_ref"),
            bytes: row.get("bytes"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        }))
    }

    /// Delete every card committed by one import run
    pub async fn delete_generation(&self, generation: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cards WHERE generation = ?")
            .bind(generation)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn card_from_row(row: &SqliteRow) -> Result<DbCard, sqlx::Error> {
    Ok(DbCard {
        id: row.get("id"),
        name: row.get("name"),
        quantity: row.get("quantity"),
        is_token: row.get("is_token"),
        category: row.get("category"),
        set_code: row.get("set_code"),
        collector_number: row.get("collector_number"),
        catalog_id: row.get("catalog_id"),
        image_id: row.get("image_id"),
        back_image_id: row.get("back_image_id"),
        has_built_in_bleed: row.get("has_built_in_bleed"),
        overrides_json: row.get("overrides_json"),
        generation: row.get("generation"),
        position: row.get("position"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
