//! HTTP client for the external indexing service.
//!
//! Endpoints:
//!   POST {base}/index   { "repo_name": "<repo_id>" }
//!   POST {base}/query   { "repo_name": "<repo_id>", "question": ..., "top_k": n, "mmr": true }

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::IndexerConfig;

use super::{DocumentFragment, VectorIndex};

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<DocumentFragment>,
    #[serde(default)]
    error: Option<String>,
}

pub struct IndexServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl IndexServiceClient {
    pub fn new(config: &IndexerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for IndexServiceClient {
    async fn build(&self, repo_id: i64) -> Result<()> {
        let url = format!("{}/index", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "repo_name": repo_id.to_string() }))
            .send()
            .await
            .context("indexing service unreachable")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("indexing service returned {status}");
        }
        let body: IndexResponse = response
            .json()
            .await
            .context("indexing service returned malformed JSON")?;
        if let Some(error) = body.error {
            anyhow::bail!("indexing service reported failure: {error}");
        }
        debug!(repo_id, "index build accepted");
        Ok(())
    }

    async fn search(&self, repo_id: i64, query: &str, k: usize) -> Result<Vec<DocumentFragment>> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "repo_name": repo_id.to_string(),
                "question": query,
                "top_k": k,
                "mmr": true,
            }))
            .send()
            .await
            .context("indexing service unreachable")?;

        let status = response.status();
        // A repo that was never indexed degrades to "no relevant context".
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(repo_id, "no vector index for repo — answering without context");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("indexing service returned {status}");
        }

        let body: QueryResponse = response
            .json()
            .await
            .context("indexing service returned malformed JSON")?;
        if let Some(error) = body.error {
            if error.to_ascii_lowercase().contains("not found") {
                warn!(repo_id, "no vector index for repo — answering without context");
                return Ok(Vec::new());
            }
            anyhow::bail!("indexing service reported failure: {error}");
        }
        Ok(body.documents)
    }
}
