//! Forge abstraction — source-code hosting providers behind one capability
//! trait, dispatched by the `kind` string stored on the forge row. Adding a
//! provider means one new impl and one new match arm; callers never inspect
//! concrete types.

pub mod github;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::ForgeRow;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// Tokens from an OAuth code exchange or refresh.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub access_token: String,
    /// `None` for providers whose OAuth apps issue non-expiring tokens.
    pub refresh_token: Option<String>,
    /// Epoch seconds; `None` = does not expire.
    pub expires_at: Option<i64>,
}

/// The authenticated user's profile as the forge reports it.
#[derive(Debug, Clone, Serialize)]
pub struct ForgeUser {
    pub remote_user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// A repository as listed by the forge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepo {
    pub remote_id: String,
    pub name: String,
    pub clone_url: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteIssue {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub comments: Vec<IssueComment>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

/// One page of results plus the forge's idea of the total count. The total
/// is a pagination-header heuristic, not an authoritative number.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}

// ─── Capability trait ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Forge: Send + Sync {
    /// URL the browser is redirected to for the OAuth handshake.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an OAuth authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<Tokens>;

    /// Refresh an expired access token.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<Tokens>;

    /// Profile of the user the token belongs to.
    async fn user_profile(&self, token: &str) -> Result<ForgeUser>;

    /// Search the caller's visible repositories.
    async fn search_repos(
        &self,
        token: &str,
        query: &str,
        page: Pagination,
    ) -> Result<Paged<RemoteRepo>>;

    /// Fetch one repository by its forge-side id.
    async fn get_repo(&self, token: &str, remote_id: &str) -> Result<RemoteRepo>;

    /// List issues with their comments.
    async fn list_issues(
        &self,
        token: &str,
        remote_id: &str,
        page: Pagination,
    ) -> Result<Paged<RemoteIssue>>;
}

/// Instantiate the concrete forge for a stored row, keyed by `row.kind`.
pub fn for_row(row: &ForgeRow, http: reqwest::Client) -> Result<Box<dyn Forge>> {
    match row.kind.as_str() {
        "github" => Ok(Box::new(github::Github::new(row, http))),
        other => anyhow::bail!("unsupported forge kind: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forge_row(kind: &str) -> ForgeRow {
        ForgeRow {
            id: 1,
            kind: kind.to_string(),
            host: String::new(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn dispatches_github_by_kind_string() {
        assert!(for_row(&forge_row("github"), reqwest::Client::new()).is_ok());
        assert!(for_row(&forge_row("sourcehut"), reqwest::Client::new()).is_err());
    }
}
