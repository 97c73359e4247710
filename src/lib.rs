pub mod ai;
pub mod chat;
pub mod config;
pub mod error;
pub mod forge;
pub mod index;
pub mod jobs;
pub mod repo;
pub mod rest;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use ai::{openai::OpenAiClient, CompletionClient};
use config::AppConfig;
use index::{client::IndexServiceClient, VectorIndex};
use jobs::{IndexJob, IndexJobs, IndexRunner};
use repo::RepoWorkspace;
use storage::Storage;

/// Shared application state passed to every handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub storage: Arc<Storage>,
    /// Text-completion capability (swapped for a stub in tests).
    pub completions: Arc<dyn CompletionClient>,
    /// Vector-index capability (swapped for a stub in tests).
    pub index: Arc<dyn VectorIndex>,
    /// The clone/snapshot/issues/index cycle, shared by the clone endpoint
    /// and the job worker.
    pub runner: IndexRunner,
    /// Handle for enqueueing background index jobs.
    pub jobs: IndexJobs,
    /// Outbound HTTP client for forge APIs.
    pub http: reqwest::Client,
    pub started_at: std::time::Instant,
}

/// Wire up storage, clients, and the job queue. Returns the context plus the
/// job receiver the caller hands to [`IndexRunner::run_worker`].
pub async fn build_context(
    config: AppConfig,
) -> Result<(Arc<AppContext>, mpsc::UnboundedReceiver<IndexJob>)> {
    let config = Arc::new(config);
    let storage = Arc::new(Storage::new(&config.data_dir).await?);

    // Configured forges land in the DB so rows can reference them by id.
    for entry in &config.forges {
        storage
            .seed_forge(&entry.kind, &entry.host, &entry.client_id, &entry.client_secret)
            .await?;
    }

    let completions: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(&config.ai)?);
    let index: Arc<dyn VectorIndex> = Arc::new(IndexServiceClient::new(&config.indexer));
    let http = reqwest::Client::new();

    let workspace = RepoWorkspace::new(&config.data_path);
    let runner = IndexRunner::new(storage.clone(), workspace, index.clone(), http.clone());
    let (jobs, job_rx) = IndexJobs::channel();

    let ctx = Arc::new(AppContext {
        config,
        storage,
        completions,
        index,
        runner,
        jobs,
        http,
        started_at: std::time::Instant::now(),
    });
    Ok((ctx, job_rx))
}
