//! Shared harness for the REST integration tests.
//!
//! Builds an `AppContext` on a temp data dir with stubbed AI capabilities,
//! binds the router to a random port, and drives it with reqwest.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use repochat::ai::{ChatTurn, CompletionClient};
use repochat::config::AppConfig;
use repochat::index::{DocumentFragment, VectorIndex};
use repochat::jobs::{IndexJobs, IndexRunner};
use repochat::repo::RepoWorkspace;
use repochat::rest::{self, auth};
use repochat::storage::Storage;
use repochat::AppContext;

/// Completion stub: answers from a script, records every request.
pub struct StubCompletions {
    pub calls: Mutex<Vec<Vec<ChatTurn>>>,
    replies: Mutex<VecDeque<String>>,
}

impl StubCompletions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
        })
    }

    pub fn script(&self, replies: &[&str]) {
        let mut queue = self.replies.lock().unwrap();
        queue.clear();
        queue.extend(replies.iter().map(|s| s.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for StubCompletions {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "stub answer".to_string()))
    }
}

/// Vector-index stub: canned fragments, records queries and build calls.
pub struct StubIndex {
    pub fragments: Mutex<Vec<DocumentFragment>>,
    pub queries: Mutex<Vec<(i64, String, usize)>>,
    pub builds: Mutex<Vec<i64>>,
}

impl StubIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fragments: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            builds: Mutex::new(Vec::new()),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for StubIndex {
    async fn build(&self, repo_id: i64) -> Result<()> {
        self.builds.lock().unwrap().push(repo_id);
        Ok(())
    }

    async fn search(&self, repo_id: i64, query: &str, k: usize) -> Result<Vec<DocumentFragment>> {
        self.queries.lock().unwrap().push((repo_id, query.to_string(), k));
        Ok(self.fragments.lock().unwrap().clone())
    }
}

pub struct TestServer {
    pub base: String,
    pub http: reqwest::Client,
    pub ctx: Arc<AppContext>,
    pub completions: Arc<StubCompletions>,
    pub index: Arc<StubIndex>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    /// Spin up storage + router on a random port, with the job worker running.
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        let config = Arc::new(config);

        let storage = Arc::new(Storage::new(&config.data_dir).await.unwrap());
        let completions = StubCompletions::new();
        let index = StubIndex::new();
        let http = reqwest::Client::new();

        let workspace = RepoWorkspace::new(&config.data_path);
        let runner = IndexRunner::new(
            storage.clone(),
            workspace,
            index.clone(),
            http.clone(),
        );
        let (jobs, job_rx) = IndexJobs::channel();

        let ctx = Arc::new(AppContext {
            config,
            storage,
            completions: completions.clone(),
            index: index.clone(),
            runner: runner.clone(),
            jobs,
            http: http.clone(),
            started_at: std::time::Instant::now(),
        });

        tokio::spawn(runner.run_worker(job_rx));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = rest::build_router(ctx.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            http,
            ctx,
            completions,
            index,
            _dir: dir,
        }
    }

    /// Seed a forge + user and mint a session; returns (user_id, bearer token).
    pub async fn signed_in_user(&self, remote_user_id: &str, name: &str) -> (i64, String) {
        let forge = self
            .ctx
            .storage
            .seed_forge("github", "", "client", "secret")
            .await
            .unwrap();
        let user = self
            .ctx
            .storage
            .upsert_user(forge.id, remote_user_id, name, None, None)
            .await
            .unwrap();
        let token = auth::new_session_token();
        self.ctx
            .storage
            .create_session(user.id, &auth::hash_token(&token))
            .await
            .unwrap();
        (user.id, token)
    }

    /// Seed an imported repo linked to the user.
    pub async fn linked_repo(&self, user_id: i64, name: &str, clone_url: &str) -> i64 {
        let repo = self
            .ctx
            .storage
            .upsert_repo(1, &format!("remote-{name}"), name, clone_url, clone_url)
            .await
            .unwrap();
        self.ctx.storage.link_user_repo(user_id, repo.id).await.unwrap();
        repo.id
    }
}
