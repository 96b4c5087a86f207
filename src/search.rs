use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::llm_interaction::TransportError;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub command: String,
    /// Percentage in 0..=100.
    pub similarity: f64,
    #[serde(default)]
    pub syntax: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Looks up documented commands similar to a free-text query.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, TransportError> {
        let url = format!("{}/search-commands", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SearchRequest { query, top_k })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "search request failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<SearchResponse>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        debug!(hits = parsed.results.len(), "search results received");
        Ok(parsed.results)
    }
}
