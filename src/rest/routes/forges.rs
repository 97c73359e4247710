// rest/routes/forges.rs — OAuth handshake, forge repo browsing, and import.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::forge::{self, Forge, Pagination};
use crate::rest::auth::{self, CurrentUser};
use crate::storage::{ForgeRow, IndexStatus, UserRow};
use crate::AppContext;

async fn forge_row(ctx: &AppContext, forge_id: i64) -> Result<ForgeRow, ApiError> {
    ctx.storage
        .get_forge(forge_id)
        .await?
        .ok_or(ApiError::NotFound("forge"))
}

/// The caller's stored access token for this forge, refreshed through the
/// forge when it has expired.
async fn forge_token(
    ctx: &AppContext,
    user: &UserRow,
    forge_id: i64,
    forge: &dyn Forge,
) -> Result<String, ApiError> {
    let stored = ctx
        .storage
        .get_forge_token(user.id, forge_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("forge account not connected".into()))?;

    let expired = stored
        .expires_at
        .is_some_and(|t| t <= Utc::now().timestamp());
    if !expired {
        return Ok(stored.access_token);
    }

    let refresh = stored.refresh_token.ok_or_else(|| {
        ApiError::BadRequest("forge token expired — reconnect the forge account".into())
    })?;
    let fresh = forge
        .refresh_tokens(&refresh)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    ctx.storage
        .put_forge_tokens(
            user.id,
            forge_id,
            &fresh.access_token,
            fresh.refresh_token.as_deref(),
            fresh.expires_at,
        )
        .await?;
    Ok(fresh.access_token)
}

// ─── OAuth handshake ──────────────────────────────────────────────────────────

pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    Path(forge_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = forge_row(&ctx, forge_id).await?;
    let forge = forge::for_row(&row, ctx.http.clone()).map_err(ApiError::Internal)?;

    let state = Uuid::new_v4().simple().to_string();
    ctx.storage.create_oauth_state(&state, row.id).await?;
    Ok(Json(json!({ "url": forge.authorize_url(&state) })))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Completes the handshake: validates the one-shot state, exchanges the
/// code, upserts the user from the forge profile, stores the forge tokens,
/// and mints a session.
pub async fn callback(
    State(ctx): State<Arc<AppContext>>,
    Path(forge_id): Path<i64>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is required".into()))?;
    let state = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("state is required".into()))?;

    let state_forge = ctx
        .storage
        .consume_oauth_state(&state)
        .await?
        .ok_or_else(|| ApiError::BadRequest("unknown or already used state".into()))?;
    if state_forge != forge_id {
        return Err(ApiError::BadRequest("state does not match forge".into()));
    }

    let row = forge_row(&ctx, forge_id).await?;
    let forge = forge::for_row(&row, ctx.http.clone()).map_err(ApiError::Internal)?;

    let tokens = forge
        .exchange_code(&code)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    let profile = forge
        .user_profile(&tokens.access_token)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let user = ctx
        .storage
        .upsert_user(
            row.id,
            &profile.remote_user_id,
            &profile.name,
            profile.email.as_deref(),
            profile.avatar_url.as_deref(),
        )
        .await?;
    ctx.storage
        .put_forge_tokens(
            user.id,
            row.id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.expires_at,
        )
        .await?;

    let session_token = auth::new_session_token();
    ctx.storage
        .create_session(user.id, &auth::hash_token(&session_token))
        .await?;
    info!(user_id = user.id, forge_id, "user signed in");

    Ok(Json(json!({ "token": session_token, "user": user })))
}

// ─── Repo browsing & import ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn search_repos(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(forge_id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let row = forge_row(&ctx, forge_id).await?;
    let forge = forge::for_row(&row, ctx.http.clone()).map_err(ApiError::Internal)?;
    let token = forge_token(&ctx, &user, row.id, forge.as_ref()).await?;

    let mut page = Pagination::default();
    if let Some(p) = query.page {
        page.page = p.max(1);
    }
    if let Some(pp) = query.per_page {
        page.per_page = pp.clamp(1, 100);
    }

    let repos = forge
        .search_repos(&token, &query.search, page)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    Ok(Json(json!({ "items": repos.items, "total": repos.total })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRepoRequest {
    pub remote_repo_id: Option<String>,
}

/// Import a repository: idempotent upsert keyed by (forge, remote id), link
/// the caller, and enqueue the clone/index job.
pub async fn add_repo(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(forge_id): Path<i64>,
    Json(body): Json<AddRepoRequest>,
) -> Result<Json<Value>, ApiError> {
    let remote_repo_id = body
        .remote_repo_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("remoteRepoId is required".into()))?
        .to_string();

    let row = forge_row(&ctx, forge_id).await?;
    let forge = forge::for_row(&row, ctx.http.clone()).map_err(ApiError::Internal)?;
    let token = forge_token(&ctx, &user, row.id, forge.as_ref()).await?;

    let remote = forge
        .get_repo(&token, &remote_repo_id)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let repo = ctx
        .storage
        .upsert_repo(row.id, &remote.remote_id, &remote.name, &remote.clone_url, &remote.url)
        .await?;
    ctx.storage.link_user_repo(user.id, repo.id).await?;

    // Re-imports re-run the whole cycle; `pending` survives a crash between
    // here and the worker picking the job up.
    ctx.storage
        .set_repo_index_status(repo.id, IndexStatus::Pending, None)
        .await?;
    ctx.jobs.enqueue(repo.id, Some(token));
    info!(repo_id = repo.id, repo = %repo.name, "repo imported — index job enqueued");

    let repo = ctx
        .storage
        .get_repo(repo.id)
        .await?
        .ok_or(ApiError::NotFound("repo"))?;
    Ok(Json(serde_json::to_value(repo).map_err(anyhow::Error::from)?))
}
