use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("Card name is empty")]
    EmptyName,
    #[error("Quantity must be at least 1 (got {0})")]
    ZeroQuantity(u32),
}

/// Set code, always stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetCode(String);

impl SetCode {
    pub fn new(code: &str) -> Self {
        SetCode(code.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the artwork for an intent comes from.
///
/// Each variant carries only the identity hint it resolves by, so an intent can
/// never hold two competing hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntentSource {
    /// Image already stored locally (uploaded by the user)
    Manual {
        local_image_id: String,
        has_built_in_bleed: Option<bool>,
    },
    /// Image hosted by MPC Autofill, addressed by its drive id. The art may
    /// belong to a token card.
    Mpc {
        mpc_id: String,
        #[serde(default)]
        is_token: bool,
    },
    /// Canonical catalog lookup by name, optionally pinned to a printing
    CatalogLookup {
        set: Option<SetCode>,
        number: Option<String>,
    },
    /// Token card, resolved through the catalog. `catalog_id` pins the exact
    /// token when the catalog already named it.
    Token {
        set: Option<SetCode>,
        number: Option<String>,
        #[serde(default)]
        catalog_id: Option<String>,
    },
}

/// How the resolver picks a provider for an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourcePreference {
    Manual,
    Mpc,
    Scryfall,
    Auto,
}

/// Per-card render settings that override the project defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardOverrides {
    pub bleed_mm: Option<f32>,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub dark_cut_lines: Option<bool>,
}

/// A normalized, unresolved request to add one card to the working set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportIntent {
    pub name: String,
    pub quantity: u32,
    pub source: IntentSource,
    pub linked_back_image_id: Option<String>,
    /// Deck-builder category such as "Maybeboard", kept for downstream filtering
    pub category: Option<String>,
    pub card_overrides: Option<CardOverrides>,
}

impl ImportIntent {
    pub fn new(name: &str, quantity: u32, source: IntentSource) -> Result<Self, IntentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IntentError::EmptyName);
        }
        if quantity == 0 {
            return Err(IntentError::ZeroQuantity(quantity));
        }

        Ok(ImportIntent {
            name: name.to_string(),
            quantity,
            source,
            linked_back_image_id: None,
            category: None,
            card_overrides: None,
        })
    }

    /// Catalog lookup by name only
    pub fn named(name: &str, quantity: u32) -> Result<Self, IntentError> {
        Self::new(
            name,
            quantity,
            IntentSource::CatalogLookup {
                set: None,
                number: None,
            },
        )
    }

    pub fn with_back(mut self, back_image_id: impl Into<String>) -> Self {
        self.linked_back_image_id = Some(back_image_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_overrides(mut self, overrides: CardOverrides) -> Self {
        self.card_overrides = Some(overrides);
        self
    }

    pub fn is_token(&self) -> bool {
        matches!(
            self.source,
            IntentSource::Token { .. } | IntentSource::Mpc { is_token: true, .. }
        )
    }

    pub fn source_preference(&self) -> SourcePreference {
        match &self.source {
            IntentSource::Manual { .. } => SourcePreference::Manual,
            IntentSource::Mpc { .. } => SourcePreference::Mpc,
            IntentSource::CatalogLookup { set: None, number: None } => SourcePreference::Auto,
            IntentSource::CatalogLookup { .. } | IntentSource::Token { .. } => {
                SourcePreference::Scryfall
            }
        }
    }

    /// Key under which two intents describe the same card
    pub fn identity_key(&self) -> String {
        let source = match &self.source {
            IntentSource::Manual { local_image_id, .. } => format!("manual:{}", local_image_id),
            IntentSource::Mpc { mpc_id, is_token } => format!(
                "{}:{}",
                if *is_token { "mpc-token" } else { "mpc" },
                mpc_id
            ),
            IntentSource::CatalogLookup { set, number } => format!(
                "catalog:{}:{}",
                set.as_ref().map(SetCode::as_str).unwrap_or(""),
                number.as_deref().unwrap_or("")
            ),
            IntentSource::Token {
                set,
                number,
                catalog_id,
            } => format!(
                "token:{}:{}:{}",
                set.as_ref().map(SetCode::as_str).unwrap_or(""),
                number.as_deref().unwrap_or(""),
                catalog_id.as_deref().unwrap_or("")
            ),
        };

        format!(
            "{}|{}|{}|{}",
            self.name.to_lowercase(),
            source,
            self.linked_back_image_id.as_deref().unwrap_or(""),
            self.category.as_deref().unwrap_or("")
        )
    }
}

/// Merge intents that describe the same card, summing their quantities.
///
/// First-seen order is kept. Intents with render overrides are never merged.
pub fn dedupe_intents(intents: Vec<ImportIntent>) -> Vec<ImportIntent> {
    let mut merged: Vec<ImportIntent> = Vec::with_capacity(intents.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for intent in intents {
        if intent.card_overrides.is_some() {
            merged.push(intent);
            continue;
        }

        let key = intent.identity_key();
        match index_by_key.get(&key) {
            Some(&index) => {
                merged[index].quantity = merged[index].quantity.saturating_add(intent.quantity);
            }
            None => {
                index_by_key.insert(key, merged.len());
                merged.push(intent);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_intents() {
        assert_eq!(ImportIntent::named("   ", 1), Err(IntentError::EmptyName));
        assert_eq!(
            ImportIntent::named("Sol Ring", 0),
            Err(IntentError::ZeroQuantity(0))
        );
        assert_eq!(ImportIntent::named("  Sol Ring ", 2).unwrap().name, "Sol Ring");
    }

    #[test]
    fn test_source_preference() {
        let auto = ImportIntent::named("Sol Ring", 1).unwrap();
        assert_eq!(auto.source_preference(), SourcePreference::Auto);

        let pinned = ImportIntent::new(
            "Sol Ring",
            1,
            IntentSource::CatalogLookup {
                set: Some(SetCode::new("CMM")),
                number: Some("432".to_string()),
            },
        )
        .unwrap();
        assert_eq!(pinned.source_preference(), SourcePreference::Scryfall);

        let mpc = ImportIntent::new(
            "Sol Ring",
            1,
            IntentSource::Mpc {
                mpc_id: "abc".to_string(),
                is_token: false,
            },
        )
        .unwrap();
        assert_eq!(mpc.source_preference(), SourcePreference::Mpc);
        assert!(!mpc.is_token());
    }

    #[test]
    fn test_set_code_is_lowercase() {
        assert_eq!(SetCode::new(" CMM ").as_str(), "cmm");
    }

    #[test]
    fn test_dedupe_sums_quantities_in_first_seen_order() {
        let intents = vec![
            ImportIntent::named("Sol Ring", 1).unwrap(),
            ImportIntent::named("Lightning Bolt", 2).unwrap(),
            ImportIntent::named("sol ring", 3).unwrap(),
            ImportIntent::named("Sol Ring", 1)
                .unwrap()
                .with_category("Maybeboard"),
        ];

        let merged = dedupe_intents(intents);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].name, "Sol Ring");
        assert_eq!(merged[0].quantity, 4);
        assert_eq!(merged[1].name, "Lightning Bolt");
        assert_eq!(merged[2].category.as_deref(), Some("Maybeboard"));
    }
}
