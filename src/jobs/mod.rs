//! Asynchronous index jobs.
//!
//! Importing a repo enqueues an [`IndexJob`] instead of firing an internal
//! HTTP call; the single worker task drains the queue in FIFO order, which
//! also serializes clone cycles against the shared on-disk tree. Progress is
//! recorded in `repos.index_status`, and repos left in a non-terminal status
//! are re-enqueued at startup so a restart cannot lose the trigger.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::forge::{self, Forge as _};
use crate::index::VectorIndex;
use crate::repo::{git, RepoWorkspace};
use crate::storage::{IndexStatus, RepoRow, Storage};

const ISSUE_PAGE_SIZE: u32 = 50;
const MAX_ISSUE_PAGES: u32 = 20;

/// One unit of work: bring a repo's working copy up to date and re-index it.
#[derive(Debug)]
pub struct IndexJob {
    pub repo_id: i64,
    /// Forge access token for private clones and issue listing.
    pub token: Option<String>,
}

/// Cheap cloneable handle for enqueueing jobs.
#[derive(Clone)]
pub struct IndexJobs {
    tx: mpsc::UnboundedSender<IndexJob>,
}

impl IndexJobs {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IndexJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, repo_id: i64, token: Option<String>) {
        if self.tx.send(IndexJob { repo_id, token }).is_err() {
            // Only possible during shutdown; the repo stays in a non-terminal
            // status and is re-enqueued on next start.
            warn!(repo_id, "index worker gone — job dropped, will recover at startup");
        }
    }
}

/// Why a cycle failed — distinguishes the indexing service saying no from
/// everything else so the HTTP layer can map it to an upstream error.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("cannot index repo: {0}")]
    Indexer(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Dependencies of the clone/index cycle, shared by the worker task and the
/// synchronous clone endpoint.
#[derive(Clone)]
pub struct IndexRunner {
    storage: Arc<Storage>,
    workspace: RepoWorkspace,
    index: Arc<dyn VectorIndex>,
    http: reqwest::Client,
}

impl IndexRunner {
    pub fn new(
        storage: Arc<Storage>,
        workspace: RepoWorkspace,
        index: Arc<dyn VectorIndex>,
        http: reqwest::Client,
    ) -> Self {
        Self { storage, workspace, index, http }
    }

    /// Run the full cycle for one repo: clone/update the working copy, write
    /// the metadata snapshot, rescrape issues, notify the indexing service.
    /// Status transitions (including `failed`) are recorded here.
    pub async fn run_cycle(&self, repo: &RepoRow, token: Option<&str>) -> Result<(), CycleError> {
        match self.cycle_inner(repo, token).await {
            Ok(()) => {
                self.storage
                    .set_repo_index_status(repo.id, IndexStatus::Indexed, None)
                    .await?;
                info!(repo_id = repo.id, repo = %repo.name, "repo indexed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .set_repo_index_status(repo.id, IndexStatus::Failed, Some(&message))
                    .await
                {
                    error!(repo_id = repo.id, err = ?status_err, "cannot record failed index status");
                }
                Err(e)
            }
        }
    }

    async fn cycle_inner(&self, repo: &RepoRow, token: Option<&str>) -> Result<(), CycleError> {
        self.storage
            .set_repo_index_status(repo.id, IndexStatus::Cloning, None)
            .await?;

        // libgit2 blocks; keep it off the runtime threads.
        let workdir = self.workspace.working_copy(repo.id);
        let clone_url = repo.clone_url.clone();
        let token_owned = token.map(str::to_string);
        let sync = tokio::task::spawn_blocking(move || {
            git::sync_working_copy(&workdir, &clone_url, token_owned.as_deref())
        })
        .await
        .context("git sync task panicked")?
        .context("git sync failed")?;
        info!(repo_id = repo.id, repo = %repo.name, ?sync, "working copy synchronized");

        self.workspace.write_snapshot(repo).await?;
        self.workspace.reset_issues(repo.id).await?;

        // Issue scraping enriches the index corpus but must not block it: a
        // missing token or a forge hiccup downgrades to an empty issues dir.
        if let Some(token) = token {
            if let Err(e) = self.scrape_issues(repo, token).await {
                warn!(repo_id = repo.id, err = ?e, "issue scrape failed — indexing without issues");
            }
        }

        self.storage
            .set_repo_index_status(repo.id, IndexStatus::Indexing, None)
            .await?;

        self.index
            .build(repo.id)
            .await
            .map_err(|e| CycleError::Indexer(e.to_string()))?;
        Ok(())
    }

    async fn scrape_issues(&self, repo: &RepoRow, token: &str) -> Result<()> {
        let forge_row = self
            .storage
            .get_forge(repo.forge_id)
            .await?
            .context("repo references an unknown forge")?;
        let forge = forge::for_row(&forge_row, self.http.clone())?;

        let mut written = 0usize;
        for page in 1..=MAX_ISSUE_PAGES {
            let batch = forge
                .list_issues(
                    token,
                    &repo.remote_id,
                    forge::Pagination { page, per_page: ISSUE_PAGE_SIZE },
                )
                .await?;
            let count = batch.items.len();
            self.workspace.write_issues(repo.id, &batch.items).await?;
            written += count;
            if count < ISSUE_PAGE_SIZE as usize {
                break;
            }
        }
        info!(repo_id = repo.id, written, "issues scraped");
        Ok(())
    }

    /// Re-enqueue repos whose cycle was interrupted by a restart.
    pub async fn recover_unfinished(&self, jobs: &IndexJobs) -> Result<()> {
        let stuck = self.storage.repos_with_unfinished_index().await?;
        for repo in stuck {
            info!(repo_id = repo.id, status = %repo.index_status, "re-enqueueing interrupted index job");
            // The token is gone with the old process; public clones still work.
            jobs.enqueue(repo.id, None);
        }
        Ok(())
    }

    /// Worker loop. Spawn once; runs until the handle side is dropped.
    pub async fn run_worker(self, mut rx: mpsc::UnboundedReceiver<IndexJob>) {
        while let Some(job) = rx.recv().await {
            let repo = match self.storage.get_repo(job.repo_id).await {
                Ok(Some(repo)) => repo,
                Ok(None) => {
                    warn!(repo_id = job.repo_id, "index job for unknown repo — skipped");
                    continue;
                }
                Err(e) => {
                    error!(repo_id = job.repo_id, err = ?e, "cannot load repo for index job");
                    continue;
                }
            };
            if let Err(e) = self.run_cycle(&repo, job.token.as_deref()).await {
                error!(repo_id = repo.id, err = %e, "index cycle failed");
            }
        }
    }
}
