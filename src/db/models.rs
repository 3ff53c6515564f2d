use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
const IMAGE_SOURCE_MPC: &str = "mpc";
const IMAGE_SOURCE_SCRYFALL: &str = "scryfall";

/// Where a stored image came from. Uploaded images never get a row here; cards
/// reference them by their local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ImageSource {
    Mpc,      // Downloaded from the alternate-art host
    Scryfall, // Referenced by catalog URL, fetched at render time
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::Mpc => IMAGE_SOURCE_MPC,
            ImageSource::Scryfall => IMAGE_SOURCE_SCRYFALL,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            IMAGE_SOURCE_MPC => Some(ImageSource::Mpc),
            IMAGE_SOURCE_SCRYFALL => Some(ImageSource::Scryfall),
            _ => None,
        }
    }
}

/// Card image
///
/// `source_ref` is the alternate-art id or the catalog URL. Bytes are only present
/// for images downloaded during import.
#[derive(Debug, Clone, PartialEq)]
pub struct DbImage {
    pub id: String,
    pub source: ImageSource,
    pub source_ref: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// One row of the working card list
///
/// `generation` is the import run that committed the row, `position` its place
/// within that commit. Render overrides are stored as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct DbCard {
    pub id: String,
    pub name: String,
    pub quantity: i64,
    pub is_token: bool,
    pub category: Option<String>,
    pub set_code: Option<String>,
    pub collector_number: Option<String>,
    /// Catalog card id when the catalog resolved the card
    pub catalog_id: Option<String>,
    pub image_id: Option<String>,
    pub back_image_id: Option<String>,
    pub has_built_in_bleed: Option<bool>,
    pub overrides_json: Option<String>,
    pub generation: i64,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}
