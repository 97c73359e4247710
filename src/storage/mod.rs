use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ForgeRow {
    pub id: i64,
    /// Provider kind, e.g. `"github"`. Dispatch key for the forge trait.
    pub kind: String,
    pub host: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub forge_id: i64,
    pub remote_user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ForgeTokenRow {
    pub user_id: i64,
    pub forge_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Epoch seconds; NULL for tokens that do not expire (GitHub OAuth apps).
    pub expires_at: Option<i64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRow {
    pub id: i64,
    pub forge_id: i64,
    pub remote_id: String,
    pub name: String,
    pub clone_url: String,
    pub url: String,
    /// One of [`IndexStatus`]; `failed` carries `index_error`.
    pub index_status: String,
    pub index_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRow {
    pub id: i64,
    pub user_id: i64,
    pub repo_id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRow {
    pub id: i64,
    pub chat_id: i64,
    /// `"user"` | `"ai"` — enforced by a CHECK constraint.
    pub sender: String,
    pub content: String,
    pub created_at: String,
}

// ─── IndexStatus ──────────────────────────────────────────────────────────────

/// Lifecycle of a repo's vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Pending,
    Cloning,
    Indexing,
    Indexed,
    Failed,
}

impl IndexStatus {
    /// Canonical SQL string stored in `repos.index_status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Cloning => "cloning",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Failed => "failed",
        }
    }

    /// True for states a restart must pick back up.
    pub fn is_unfinished(&self) -> bool {
        matches!(
            self,
            IndexStatus::Pending | IndexStatus::Cloning | IndexStatus::Indexing
        )
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("repochat.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Forges ─────────────────────────────────────────────────────────────

    /// Upsert a configured forge, keyed by (kind, client_id).
    pub async fn seed_forge(
        &self,
        kind: &str,
        host: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ForgeRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO forges (kind, host, client_id, client_secret, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (kind, client_id) DO UPDATE SET
                 host = excluded.host,
                 client_secret = excluded.client_secret",
        )
        .bind(kind)
        .bind(host)
        .bind(client_id)
        .bind(client_secret)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let row: ForgeRow =
            sqlx::query_as("SELECT * FROM forges WHERE kind = ? AND client_id = ?")
                .bind(kind)
                .bind(client_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn get_forge(&self, id: i64) -> Result<Option<ForgeRow>> {
        Ok(sqlx::query_as("SELECT * FROM forges WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // ─── Users & sessions ───────────────────────────────────────────────────

    /// Upsert a user from a forge profile, keyed by (forge_id, remote_user_id).
    pub async fn upsert_user(
        &self,
        forge_id: i64,
        remote_user_id: &str,
        name: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<UserRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (forge_id, remote_user_id, name, email, avatar_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (forge_id, remote_user_id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 avatar_url = excluded.avatar_url",
        )
        .bind(forge_id)
        .bind(remote_user_id)
        .bind(name)
        .bind(email)
        .bind(avatar_url)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let row: UserRow =
            sqlx::query_as("SELECT * FROM users WHERE forge_id = ? AND remote_user_id = ?")
                .bind(forge_id)
                .bind(remote_user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn create_session(&self, user_id: i64, token_hash: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO sessions (user_id, token_hash, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token_hash)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_by_session(&self, token_hash: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as(
            "SELECT users.* FROM users
             JOIN sessions ON sessions.user_id = users.id
             WHERE sessions.token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ─── Forge tokens & OAuth states ────────────────────────────────────────

    pub async fn put_forge_tokens(
        &self,
        user_id: i64,
        forge_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO forge_tokens (user_id, forge_id, access_token, refresh_token, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, forge_id) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(forge_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_forge_token(
        &self,
        user_id: i64,
        forge_id: i64,
    ) -> Result<Option<ForgeTokenRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM forge_tokens WHERE user_id = ? AND forge_id = ?")
                .bind(user_id)
                .bind(forge_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn create_oauth_state(&self, state: &str, forge_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO oauth_states (state, forge_id, created_at) VALUES (?, ?, ?)")
            .bind(state)
            .bind(forge_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete and return the forge id for a state. A state can be consumed
    /// exactly once.
    pub async fn consume_oauth_state(&self, state: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("DELETE FROM oauth_states WHERE state = ? RETURNING forge_id")
                .bind(state)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    // ─── Repos ──────────────────────────────────────────────────────────────

    /// Idempotent upsert keyed by (forge_id, remote_id). Re-imports update
    /// name/clone_url/url in place; id, index_status, and created_at survive.
    pub async fn upsert_repo(
        &self,
        forge_id: i64,
        remote_id: &str,
        name: &str,
        clone_url: &str,
        url: &str,
    ) -> Result<RepoRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO repos (forge_id, remote_id, name, clone_url, url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (forge_id, remote_id) DO UPDATE SET
                 name = excluded.name,
                 clone_url = excluded.clone_url,
                 url = excluded.url,
                 updated_at = excluded.updated_at",
        )
        .bind(forge_id)
        .bind(remote_id)
        .bind(name)
        .bind(clone_url)
        .bind(url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let row: RepoRow =
            sqlx::query_as("SELECT * FROM repos WHERE forge_id = ? AND remote_id = ?")
                .bind(forge_id)
                .bind(remote_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn get_repo(&self, id: i64) -> Result<Option<RepoRow>> {
        Ok(sqlx::query_as("SELECT * FROM repos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn count_repos(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repos")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    pub async fn link_user_repo(&self, user_id: i64, repo_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_repos (user_id, repo_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_has_repo_access(&self, user_id: i64, repo_id: i64) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM user_repos WHERE user_id = ? AND repo_id = ?")
                .bind(user_id)
                .bind(repo_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// True when any user at all is linked to the repo.
    pub async fn repo_is_linked(&self, repo_id: i64) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM user_repos WHERE repo_id = ? LIMIT 1")
                .bind(repo_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn set_repo_index_status(
        &self,
        repo_id: i64,
        status: IndexStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE repos SET index_status = ?, index_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(&now)
        .bind(repo_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Repos whose index cycle was interrupted — re-enqueued at startup.
    pub async fn repos_with_unfinished_index(&self) -> Result<Vec<RepoRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM repos WHERE index_status IN ('pending', 'cloning', 'indexing')
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    // ─── Chats & messages ───────────────────────────────────────────────────

    pub async fn create_chat(&self, user_id: i64, repo_id: i64, name: &str) -> Result<ChatRow> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("INSERT INTO chats (user_id, repo_id, name, created_at) VALUES (?, ?, ?, ?)")
                .bind(user_id)
                .bind(repo_id)
                .bind(name)
                .bind(&now)
                .execute(&self.pool)
                .await?;
        let id = result.last_insert_rowid();
        let row: ChatRow = sqlx::query_as("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    /// Fetch a chat only when it belongs to `user_id`. Another user's chat is
    /// indistinguishable from a missing one.
    pub async fn get_chat_for_user(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM chats WHERE id = ? AND user_id = ?")
                .bind(chat_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_chats(&self, user_id: i64) -> Result<Vec<ChatRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM chats WHERE user_id = ? ORDER BY created_at DESC, id DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn rename_chat(&self, chat_id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE chats SET name = ? WHERE id = ?")
            .bind(name)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Messages in conversation order. (created_at, id) breaks timestamp ties
    /// deterministically — the two rows of one turn share a timestamp.
    pub async fn list_chat_messages(&self, chat_id: i64) -> Result<Vec<ChatMessageRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM chat_messages WHERE chat_id = ? ORDER BY created_at, id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Append one completed turn: the user utterance and the assistant reply,
    /// in that order, in a single transaction. Called only after the whole
    /// pipeline has succeeded, so a mid-pipeline failure leaves no history.
    pub async fn append_chat_turn(
        &self,
        chat_id: i64,
        user_message: &str,
        ai_message: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO chat_messages (chat_id, sender, content, created_at) VALUES (?, 'user', ?, ?)",
        )
        .bind(chat_id)
        .bind(user_message)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO chat_messages (chat_id, sender, content, created_at) VALUES (?, 'ai', ?, ?)",
        )
        .bind(chat_id)
        .bind(ai_message)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (tempfile::TempDir, Storage, i64) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let forge = storage
            .seed_forge("github", "github.com", "client", "secret")
            .await
            .unwrap();
        let user = storage
            .upsert_user(forge.id, "42", "alice", None, None)
            .await
            .unwrap();
        (dir, storage, user.id)
    }

    #[tokio::test]
    async fn upsert_repo_is_idempotent() {
        let (_dir, storage, _user) = setup().await;

        let first = storage
            .upsert_repo(1, "659184353", "octo/spoon", "https://x/spoon.git", "https://x/spoon")
            .await
            .unwrap();
        let second = storage
            .upsert_repo(1, "659184353", "octo/spoon-knife", "https://x/knife.git", "https://x/knife")
            .await
            .unwrap();

        assert_eq!(first.id, second.id, "re-import must not create a new row");
        assert_eq!(second.name, "octo/spoon-knife");
        assert_eq!(second.clone_url, "https://x/knife.git");
        assert_eq!(storage.count_repos().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chat_turn_appends_user_then_ai() {
        let (_dir, storage, user_id) = setup().await;
        let repo = storage
            .upsert_repo(1, "7", "octo/spoon", "https://x.git", "https://x")
            .await
            .unwrap();
        let chat = storage
            .create_chat(user_id, repo.id, "Chat with octo/spoon")
            .await
            .unwrap();

        storage
            .append_chat_turn(chat.id, "What does this repo do?", "It forks spoons.")
            .await
            .unwrap();

        let messages = storage.list_chat_messages(chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, "user");
        assert_eq!(messages[0].content, "What does this repo do?");
        assert_eq!(messages[1].sender, "ai");
    }

    #[tokio::test]
    async fn message_order_matches_insertion_order() {
        let (_dir, storage, user_id) = setup().await;
        let repo = storage
            .upsert_repo(1, "8", "octo/x", "https://x.git", "https://x")
            .await
            .unwrap();
        let chat = storage.create_chat(user_id, repo.id, "Chat with octo/x").await.unwrap();

        for i in 0..4 {
            storage
                .append_chat_turn(chat.id, &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        let messages = storage.list_chat_messages(chat.id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["q0", "a0", "q1", "a1", "q2", "a2", "q3", "a3"]);
    }

    #[tokio::test]
    async fn chat_is_scoped_to_its_owner() {
        let (_dir, storage, user_id) = setup().await;
        let other = storage.upsert_user(1, "43", "mallory", None, None).await.unwrap();
        let repo = storage
            .upsert_repo(1, "9", "octo/x", "https://x.git", "https://x")
            .await
            .unwrap();
        let chat = storage.create_chat(user_id, repo.id, "Chat with octo/x").await.unwrap();

        assert!(storage.get_chat_for_user(chat.id, user_id).await.unwrap().is_some());
        assert!(storage.get_chat_for_user(chat.id, other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oauth_state_consumes_once() {
        let (_dir, storage, _user) = setup().await;
        storage.create_oauth_state("s1", 1).await.unwrap();
        assert_eq!(storage.consume_oauth_state("s1").await.unwrap(), Some(1));
        assert_eq!(storage.consume_oauth_state("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unfinished_index_statuses_are_found() {
        let (_dir, storage, _user) = setup().await;
        let a = storage.upsert_repo(1, "a", "a", "u", "u").await.unwrap();
        let b = storage.upsert_repo(1, "b", "b", "u", "u").await.unwrap();
        let c = storage.upsert_repo(1, "c", "c", "u", "u").await.unwrap();

        storage.set_repo_index_status(a.id, IndexStatus::Indexed, None).await.unwrap();
        storage.set_repo_index_status(b.id, IndexStatus::Cloning, None).await.unwrap();
        storage
            .set_repo_index_status(c.id, IndexStatus::Failed, Some("cannot index repo"))
            .await
            .unwrap();

        let unfinished = storage.repos_with_unfinished_index().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, b.id);
    }
}
