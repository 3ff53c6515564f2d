use crate::import::resolver::{CardCatalog, ProviderError};
use crate::scryfall::models::{
    CardIdentifier, CollectionResult, PrintsPage, RelatedCard, ScryfallCard,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Hard stop for search pagination
const MAX_SEARCH_PAGES: u32 = 10;

/// Collection request body
#[derive(Debug, Serialize)]
struct CollectionRequest<'a> {
    identifiers: &'a [CardIdentifier],
}

/// Collection response wrapper
#[derive(Debug, Deserialize)]
struct CollectionResponse {
    data: Vec<ScryfallCard>,
    #[serde(default)]
    not_found: Vec<CardIdentifier>,
}

/// Search response wrapper
#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<ScryfallCard>,
    #[serde(default)]
    has_more: bool,
}

/// Autocomplete response wrapper
#[derive(Debug, Deserialize)]
struct CatalogResponse {
    data: Vec<String>,
}

/// Client for the canonical card catalog
#[derive(Clone)]
pub struct ScryfallClient {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl ScryfallClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://api.scryfall.com".to_string(),
            user_agent: concat!("deckport/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("📡 Catalog API: GET {} {:?}", url, params);

        let response = self
            .client
            .get(&url)
            .query(params)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .send()
            .await?;

        read_json(response).await
    }

    /// Run a search, following pagination up to `MAX_SEARCH_PAGES`
    async fn search_all(
        &self,
        query: &str,
        unique: &str,
    ) -> Result<Vec<ScryfallCard>, ProviderError> {
        let mut cards = Vec::new();
        for page in 1..=MAX_SEARCH_PAGES {
            let page = match self.search_page(query, unique, page).await {
                Ok(page) => page,
                // An empty result set is reported as 404
                Err(ProviderError::NotFound) => break,
                Err(e) => return Err(e),
            };
            cards.extend(page.cards);
            if !page.has_more {
                break;
            }
        }
        Ok(cards)
    }

    async fn search_page(
        &self,
        query: &str,
        unique: &str,
        page: u32,
    ) -> Result<PrintsPage, ProviderError> {
        let list: ListResponse = self
            .get_json(
                "/cards/search",
                &[
                    ("q", query.to_string()),
                    ("unique", unique.to_string()),
                    ("order", "released".to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;

        Ok(PrintsPage {
            cards: list.data,
            has_more: list.has_more,
        })
    }
}

/// Map a catalog response to a value or a provider error
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else if status == 429 {
        warn!("✗ Catalog rate limit exceeded");
        Err(ProviderError::RateLimited)
    } else if status == 404 {
        Err(ProviderError::NotFound)
    } else {
        warn!("✗ Catalog API error: {}", status);
        Err(ProviderError::Status(status.as_u16()))
    }
}

/// Exact-name search clause
fn exact_name(name: &str) -> String {
    format!("!\"{}\"", name.replace('"', ""))
}

#[async_trait]
impl CardCatalog for ScryfallClient {
    async fn lookup_collection(
        &self,
        identifiers: &[CardIdentifier],
    ) -> Result<CollectionResult, ProviderError> {
        let url = format!("{}/cards/collection", self.base_url);
        info!("📡 Catalog API: POST {} with {} identifier(s)", url, identifiers.len());

        let response = self
            .client
            .post(&url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .json(&CollectionRequest { identifiers })
            .send()
            .await?;

        let collection: CollectionResponse = read_json(response).await?;
        info!(
            "✓ Collection lookup found {} card(s), {} not found",
            collection.data.len(),
            collection.not_found.len()
        );

        Ok(CollectionResult {
            found: collection.data,
            not_found: collection.not_found,
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<ScryfallCard>, ProviderError> {
        match self.search_page(query, "cards", 1).await {
            Ok(page) => Ok(page.cards),
            Err(ProviderError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn autocomplete(&self, partial: &str) -> Result<Vec<String>, ProviderError> {
        let names: CatalogResponse = self
            .get_json("/cards/autocomplete", &[("q", partial.to_string())])
            .await?;
        Ok(names.data)
    }

    async fn search_prints(&self, name: &str, page: u32) -> Result<PrintsPage, ProviderError> {
        match self.search_page(&exact_name(name), "prints", page.max(1)).await {
            Err(ProviderError::NotFound) if page <= 1 => Ok(PrintsPage::default()),
            other => other,
        }
    }

    async fn token_parts(&self, names: &[String]) -> Result<Vec<RelatedCard>, ProviderError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let query = names
            .iter()
            .map(|name| exact_name(name))
            .collect::<Vec<_>>()
            .join(" or ");
        let cards = self.search_all(&query, "cards").await?;

        let mut seen = HashSet::new();
        let parts: Vec<RelatedCard> = cards
            .iter()
            .flat_map(ScryfallCard::token_parts)
            .filter(|part| seen.insert(part.id.clone()))
            .collect();

        debug!("Found {} token part(s) for {} card(s)", parts.len(), names.len());
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name_strips_quotes() {
        assert_eq!(exact_name("Sol Ring"), "!\"Sol Ring\"");
        assert_eq!(exact_name("\"Ach! Hans, Run!\""), "!\"Ach! Hans, Run!\"");
    }

    #[test]
    fn test_collection_response_shape() {
        let json = r#"{
            "object": "list",
            "not_found": [{"name": "Nonexistent Card"}],
            "data": [{"id": "x", "name": "Sol Ring", "set": "cmm", "collector_number": "432"}]
        }"#;
        let response: CollectionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(
            response.not_found,
            vec![CardIdentifier::Name {
                name: "Nonexistent Card".to_string()
            }]
        );
    }
}
