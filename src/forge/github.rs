//! GitHub-backed forge implementation.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::storage::ForgeRow;

use super::{
    Forge, ForgeUser, IssueComment, Paged, Pagination, RemoteIssue, RemoteRepo, Tokens,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_OAUTH_BASE: &str = "https://github.com";
const OAUTH_SCOPES: &str = "read:user user:email repo";
// GitHub rejects requests without a User-Agent.
const USER_AGENT: &str = concat!("repochat/", env!("CARGO_PKG_VERSION"));

pub struct Github {
    client_id: String,
    client_secret: String,
    api_base: String,
    oauth_base: String,
    http: reqwest::Client,
}

// ─── Response shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    id: i64,
    full_name: String,
    clone_url: String,
    html_url: String,
    owner: GithubOwner,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<GithubRepo>,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    comments: i64,
    comments_url: String,
    /// Present when the "issue" is actually a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubComment {
    user: GithubOwner,
    #[serde(default)]
    body: Option<String>,
}

impl Github {
    pub fn new(row: &ForgeRow, http: reqwest::Client) -> Self {
        let api_base = if row.host.is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            format!("https://api.{}", row.host)
        };
        let oauth_base = if row.host.is_empty() {
            DEFAULT_OAUTH_BASE.to_string()
        } else {
            format!("https://{}", row.host)
        };
        Self {
            client_id: row.client_id.clone(),
            client_secret: row.client_secret.clone(),
            api_base,
            oauth_base,
            http,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("GitHub request failed: {path}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GitHub returned {status} for {path}");
        }
        Ok(response.json().await.context("malformed GitHub response")?)
    }

    async fn token_request(&self, body: serde_json::Value) -> Result<Tokens> {
        let response = self
            .http
            .post(format!("{}/login/oauth/access_token", self.oauth_base))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&body)
            .send()
            .await
            .context("GitHub token endpoint unreachable")?;
        let parsed: TokenResponse = response
            .json()
            .await
            .context("malformed GitHub token response")?;

        if let Some(error) = parsed.error {
            let detail = parsed.error_description.unwrap_or_default();
            anyhow::bail!("GitHub token exchange failed: {error} {detail}");
        }
        let access_token = parsed
            .access_token
            .context("GitHub token response missing access_token")?;

        // OAuth-app tokens carry no expiry; GitHub Apps report expires_in.
        let expires_at = parsed.expires_in.map(|secs| Utc::now().timestamp() + secs);
        Ok(Tokens {
            access_token,
            refresh_token: parsed.refresh_token,
            expires_at,
        })
    }
}

#[async_trait]
impl Forge for Github {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/login/oauth/authorize?client_id={}&state={}&scope={}",
            self.oauth_base,
            self.client_id,
            state,
            OAUTH_SCOPES.replace(' ', "%20")
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        self.token_request(json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
            "grant_type": "authorization_code",
        }))
        .await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<Tokens> {
        self.token_request(json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "refresh_token": refresh_token,
            "grant_type": "refresh_token",
        }))
        .await
    }

    async fn user_profile(&self, token: &str) -> Result<ForgeUser> {
        let user: GithubUser = self.get_json(token, "/user").await?;
        Ok(ForgeUser {
            remote_user_id: user.id.to_string(),
            name: user.name.unwrap_or(user.login),
            email: user.email,
            avatar_url: user.avatar_url,
        })
    }

    async fn search_repos(
        &self,
        token: &str,
        query: &str,
        page: Pagination,
    ) -> Result<Paged<RemoteRepo>> {
        let q = format!("is:public fork:false archived:false {query}");
        let path = format!(
            "/search/repositories?q={}&sort=updated&per_page={}&page={}",
            urlencode(q.trim()),
            page.per_page,
            page.page
        );
        let response: SearchResponse = self.get_json(token, &path).await?;
        Ok(Paged {
            total: response.total_count,
            items: response.items.into_iter().map(remote_repo).collect(),
        })
    }

    async fn get_repo(&self, token: &str, remote_id: &str) -> Result<RemoteRepo> {
        let repo: GithubRepo = self
            .get_json(token, &format!("/repositories/{remote_id}"))
            .await?;
        Ok(remote_repo(repo))
    }

    async fn list_issues(
        &self,
        token: &str,
        remote_id: &str,
        page: Pagination,
    ) -> Result<Paged<RemoteIssue>> {
        let repo: GithubRepo = self
            .get_json(token, &format!("/repositories/{remote_id}"))
            .await?;

        let path = format!(
            "/repos/{}/{}/issues?per_page={}&page={}",
            repo.owner.login, repo.name, page.per_page, page.page
        );
        let response = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .context("GitHub issue listing failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GitHub returned {status} for {path}");
        }

        // Total count heuristic: last-page number × page size from the Link
        // header. 0 when the header is absent (single page of results).
        let total = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(parse_link_header_total)
            .unwrap_or(0);

        let issues: Vec<GithubIssue> =
            response.json().await.context("malformed GitHub issue list")?;

        let mut items = Vec::with_capacity(issues.len());
        for issue in issues {
            if issue.pull_request.is_some() {
                continue;
            }
            let comments = if issue.comments > 0 {
                self.fetch_comments(token, &issue.comments_url).await?
            } else {
                Vec::new()
            };
            items.push(RemoteIssue {
                number: issue.number,
                title: issue.title,
                body: issue.body.unwrap_or_default(),
                labels: issue.labels.into_iter().map(|l| l.name).collect(),
                comments,
            });
        }
        debug!(repo = %repo.full_name, count = items.len(), total, "listed issues");
        Ok(Paged { items, total })
    }
}

impl Github {
    async fn fetch_comments(&self, token: &str, comments_url: &str) -> Result<Vec<IssueComment>> {
        let response = self
            .http
            .get(comments_url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .context("GitHub comment fetch failed")?;
        if !response.status().is_success() {
            anyhow::bail!("GitHub returned {} for issue comments", response.status());
        }
        let comments: Vec<GithubComment> =
            response.json().await.context("malformed GitHub comments")?;
        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }
}

fn remote_repo(repo: GithubRepo) -> RemoteRepo {
    RemoteRepo {
        remote_id: repo.id.to_string(),
        name: repo.full_name,
        clone_url: repo.clone_url,
        url: repo.html_url,
    }
}

/// Derive a total issue count from a GitHub `Link` pagination header:
/// last-page number × per_page from the `rel="last"` URL. Absent or
/// unparsable headers count as 0.
///
/// Example segment:
/// `<https://api.github.com/repositories/659184353/issues?per_page=2&page=3>; rel="last"`
pub fn parse_link_header_total(header: &str) -> u64 {
    let last = match header
        .split(',')
        .find(|segment| segment.contains("rel=\"last\""))
    {
        Some(segment) => segment,
        None => return 0,
    };

    let url = match (last.find('<'), last.find('>')) {
        (Some(start), Some(end)) if start < end => &last[start + 1..end],
        _ => return 0,
    };
    let query = match url.split_once('?') {
        Some((_, q)) => q,
        None => return 0,
    };

    let mut page = 0u64;
    let mut per_page = 0u64;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("page", v)) => page = v.parse().unwrap_or(0),
            Some(("per_page", v)) => per_page = v.parse().unwrap_or(0),
            _ => {}
        }
    }
    page * per_page
}

/// Percent-encode the characters GitHub's search query syntax needs escaped.
fn urlencode(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('+', "%2B")
        .replace('#', "%23")
        .replace('&', "%26")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github() -> Github {
        let row = ForgeRow {
            id: 1,
            kind: "github".into(),
            host: String::new(),
            client_id: "client123".into(),
            client_secret: "shh".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        Github::new(&row, reqwest::Client::new())
    }

    #[test]
    fn authorize_url_carries_client_id_state_and_scopes() {
        let url = github().authorize_url("state-abc");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("state=state-abc"));
        assert!(url.contains("scope=read:user%20user:email%20repo"));
    }

    #[test]
    fn link_header_total_multiplies_last_page_by_page_size() {
        let header = "<https://api.github.com/repositories/659184353/issues?per_page=2&page=2>; \
                      rel=\"next\", \
                      <https://api.github.com/repositories/659184353/issues?per_page=2&page=3>; \
                      rel=\"last\"";
        assert_eq!(parse_link_header_total(header), 6);
    }

    #[test]
    fn link_header_total_handles_reordered_params() {
        let header =
            "<https://api.github.com/repos/o/r/issues?page=4&per_page=25>; rel=\"last\"";
        assert_eq!(parse_link_header_total(header), 100);
    }

    #[test]
    fn link_header_without_last_relation_counts_zero() {
        assert_eq!(parse_link_header_total(""), 0);
        assert_eq!(
            parse_link_header_total("<https://api.github.com/x?page=2>; rel=\"next\""),
            0
        );
    }

    #[test]
    fn search_query_is_escaped() {
        assert_eq!(urlencode("is:public a b"), "is:public%20a%20b");
        assert_eq!(urlencode("c++ #tag"), "c%2B%2B%20%23tag");
    }
}
