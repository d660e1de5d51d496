use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::errors::AppError;

/// One ranked result from the similarity index. `metadata` is whatever the
/// index stored alongside the embedding; the tool layer flattens it.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Text-to-vector similarity search, consumed as an oracle: ranked hits with
/// a relevance score and arbitrary metadata.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, AppError>;
}

/// REST client for an Upstash-style vector index: `POST {base}/query` with a
/// bearer token, the index embeds the raw text server-side.
#[derive(Clone)]
pub struct VectorIndexClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl VectorIndexClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[async_trait]
impl SimilaritySearch for VectorIndexClient {
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, AppError> {
        let url = format!("{}/query", self.base_url);
        debug!(top_k, "querying similarity index");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "data": text,
                "topK": top_k,
                "includeMetadata": true,
            }))
            .send()
            .await
            .map_err(|e| {
                error!("similarity index request failed: {e}");
                AppError::VectorSearchFailed { message: e.to_string() }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("similarity index returned {status}: {body}");
            return Err(AppError::VectorSearchFailed {
                message: format!("index returned {status}"),
            });
        }

        let parsed: QueryResponse = response.json().await.map_err(|e| {
            AppError::VectorSearchFailed { message: format!("malformed index response: {e}") }
        })?;

        Ok(parsed.result)
    }
}
