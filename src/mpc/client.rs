use crate::import::resolver::{ArtSource, ProviderError};
use crate::mpc::models::{
    search_query, AltArtMatches, SearchQuery, SearchRequest, SearchResponse, SearchSettings,
};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

const CARD_TYPE: &str = "CARD";

/// Client for the MPC Autofill art index and its image host
#[derive(Clone)]
pub struct MpcClient {
    client: Client,
    base_url: String,
    image_url_prefix: String,
}

impl MpcClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://mpcfill.com".to_string(),
            image_url_prefix: "https://drive.google.com/uc?export=download&id=".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Prefix the url-encoded image id is appended to
    pub fn with_image_url_prefix(mut self, prefix: &str) -> Self {
        self.image_url_prefix = prefix.to_string();
        self
    }

    pub fn image_url(&self, mpc_id: &str) -> String {
        format!("{}{}", self.image_url_prefix, urlencoding::encode(mpc_id))
    }
}

#[async_trait]
impl ArtSource for MpcClient {
    async fn search_alt_art(&self, names: &[String]) -> Result<AltArtMatches, ProviderError> {
        let mut queries: Vec<String> = names.iter().map(|name| search_query(name)).collect();
        queries.sort();
        queries.dedup();

        let url = format!("{}/2/searchResults/", self.base_url);
        info!("📡 Art API: POST {} with {} quer(ies)", url, queries.len());

        let request = SearchRequest {
            search_settings: SearchSettings::default(),
            queries: queries
                .iter()
                .map(|query| SearchQuery {
                    query: query.clone(),
                    card_type: CARD_TYPE.to_string(),
                })
                .collect(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if status == 429 {
            warn!("✗ Art API rate limit exceeded");
            return Err(ProviderError::RateLimited);
        } else if !status.is_success() {
            warn!("✗ Art API error: {}", status);
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        let matches: AltArtMatches = body
            .results
            .into_iter()
            .filter_map(|(query, by_type)| {
                let ids = by_type.get(CARD_TYPE)?.clone();
                (!ids.is_empty()).then_some((query, ids))
            })
            .collect();

        info!("✓ Art search matched {}/{} quer(ies)", matches.len(), queries.len());
        Ok(matches)
    }

    async fn fetch_image(&self, mpc_id: &str) -> Result<Vec<u8>, ProviderError> {
        let url = self.image_url(mpc_id);
        debug!("Downloading art image {}", mpc_id);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == 404 {
            return Err(ProviderError::NotFound);
        } else if status == 429 {
            return Err(ProviderError::RateLimited);
        } else if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        debug!("Downloaded {} bytes for art image {}", bytes.len(), mpc_id);
        Ok(bytes.to_vec())
    }
}
