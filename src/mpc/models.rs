use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Image ids per normalized search query, best match first
pub type AltArtMatches = HashMap<String, Vec<String>>;

/// Search settings sent with every alternate-art search
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    pub search_type_settings: SearchTypeSettings,
    pub filter_settings: FilterSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTypeSettings {
    pub fuzzy_search: bool,
    pub filter_cardbacks: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    #[serde(rename = "minimumDPI")]
    pub minimum_dpi: u32,
    #[serde(rename = "maximumDPI")]
    pub maximum_dpi: u32,
    pub maximum_size: u32,
    pub languages: Vec<String>,
    pub includes_tags: Vec<String>,
    pub excludes_tags: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            search_type_settings: SearchTypeSettings {
                fuzzy_search: false,
                filter_cardbacks: false,
            },
            filter_settings: FilterSettings {
                minimum_dpi: 0,
                maximum_dpi: 1500,
                maximum_size: 30,
                languages: Vec::new(),
                includes_tags: Vec::new(),
                excludes_tags: vec!["NSFW".to_string()],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: String,
    pub card_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search_settings: SearchSettings,
    pub queries: Vec<SearchQuery>,
}

/// `results[query][card_type] = [image ids]`
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: HashMap<String, HashMap<String, Vec<String>>>,
}

/// Normalize a card name the way the art index stores queries: front face only,
/// lowercase, punctuation removed, whitespace collapsed.
pub fn search_query(name: &str) -> String {
    let front = name.split(" // ").next().unwrap_or(name);
    front
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_normalization() {
        assert_eq!(search_query("Sol Ring"), "sol ring");
        assert_eq!(search_query("Urza's Saga"), "urzas saga");
        assert_eq!(search_query("  Borborygmos,  Enraged "), "borborygmos enraged");
        assert_eq!(
            search_query("Delver of Secrets // Insectile Aberration"),
            "delver of secrets"
        );
    }

    #[test]
    fn test_request_shape() {
        let request = SearchRequest {
            search_settings: SearchSettings::default(),
            queries: vec![SearchQuery {
                query: "sol ring".to_string(),
                card_type: "CARD".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["queries"][0]["cardType"], "CARD");
        assert_eq!(json["searchSettings"]["filterSettings"]["maximumDPI"], 1500);
    }
}
