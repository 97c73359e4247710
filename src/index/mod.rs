//! Vector index seam.
//!
//! Repository content is embedded and searched by an external indexing
//! service, keyed by repository id. [`VectorIndex`] is the capability the
//! rest of the crate programs against; [`client::IndexServiceClient`] is the
//! HTTP implementation.

pub mod client;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One retrieved fragment of repository content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFragment {
    pub content: String,
    /// Originating file or issue path, when the service reports one.
    #[serde(default)]
    pub source: Option<String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// (Re)build the index for a repository from its on-disk working copy.
    async fn build(&self, repo_id: i64) -> Result<()>;

    /// Diversity-aware (maximal-marginal-relevance) nearest-neighbor search.
    /// A repository with no index yields an empty list, not an error.
    async fn search(&self, repo_id: i64, query: &str, k: usize) -> Result<Vec<DocumentFragment>>;
}
