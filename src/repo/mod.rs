//! On-disk workspace for imported repositories.
//!
//! Layout per repo, under the configured `data_path`:
//!   {data_path}/{repo_id}/repo/       git working copy
//!   {data_path}/{repo_id}/repo.json   metadata snapshot
//!   {data_path}/{repo_id}/issues/     one markdown file per scraped issue

pub mod git;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::forge::RemoteIssue;
use crate::storage::RepoRow;

#[derive(Clone)]
pub struct RepoWorkspace {
    root: PathBuf,
}

impl RepoWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repo_root(&self, repo_id: i64) -> PathBuf {
        self.root.join(repo_id.to_string())
    }

    /// The git working copy directory.
    pub fn working_copy(&self, repo_id: i64) -> PathBuf {
        self.repo_root(repo_id).join("repo")
    }

    pub fn snapshot_path(&self, repo_id: i64) -> PathBuf {
        self.repo_root(repo_id).join("repo.json")
    }

    pub fn issues_dir(&self, repo_id: i64) -> PathBuf {
        self.repo_root(repo_id).join("issues")
    }

    /// Serialize the repo record next to the working copy so the indexing
    /// service can pick up repository metadata.
    pub async fn write_snapshot(&self, repo: &RepoRow) -> Result<()> {
        let path = self.snapshot_path(repo.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(repo)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    /// Remove any previously scraped issues and recreate the directory empty.
    pub async fn reset_issues(&self, repo_id: i64) -> Result<()> {
        let dir = self.issues_dir(repo_id);
        if dir_exists(&dir).await {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("cannot reset {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    /// Write one `{number}.md` per issue into the issues directory.
    pub async fn write_issues(&self, repo_id: i64, issues: &[RemoteIssue]) -> Result<()> {
        let dir = self.issues_dir(repo_id);
        tokio::fs::create_dir_all(&dir).await?;
        for issue in issues {
            let path = dir.join(format!("{}.md", issue.number));
            tokio::fs::write(&path, render_issue(issue))
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
        }
        Ok(())
    }
}

/// Markdown rendering of one issue for the index corpus.
fn render_issue(issue: &RemoteIssue) -> String {
    let mut out = format!("# issue \"{}\" ({})", issue.title, issue.number);

    if !issue.labels.is_empty() {
        out.push_str("\n\nLabels: ");
        out.push_str(&issue.labels.join(", "));
    }

    if !issue.body.is_empty() {
        out.push_str("\n\n");
        out.push_str(&issue.body);
    }

    if !issue.comments.is_empty() {
        out.push_str("\n\n## Comments:\n");
        for comment in &issue.comments {
            out.push_str(&format!("- {}: {}\n", comment.author, comment.body));
        }
    }
    out
}

async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
