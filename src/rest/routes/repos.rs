// rest/routes/repos.rs — repo lookup and the synchronous clone/index trigger.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::jobs::CycleError;
use crate::rest::auth::CurrentUser;
use crate::AppContext;

pub async fn get_repo(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(repo_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !ctx.storage.user_has_repo_access(user.id, repo_id).await? {
        return Err(ApiError::NotFound("repo"));
    }
    let repo = ctx
        .storage
        .get_repo(repo_id)
        .await?
        .ok_or(ApiError::NotFound("repo"))?;
    Ok(Json(serde_json::to_value(repo).map_err(anyhow::Error::from)?))
}

/// Run the clone/snapshot/issues/index cycle for one repo, synchronously.
///
/// A forge token may arrive in the `gh_token` header (the UI forwards it
/// right after OAuth); otherwise the caller's stored token for the repo's
/// forge is used; otherwise the clone is anonymous.
pub async fn clone_repo(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(repo_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let repo = ctx
        .storage
        .get_repo(repo_id)
        .await?
        .ok_or(ApiError::NotFound("repo"))?;

    // A repo someone else imported is off limits; one nobody has linked yet
    // may be cloned (import links it right after).
    if ctx.storage.repo_is_linked(repo.id).await?
        && !ctx.storage.user_has_repo_access(user.id, repo.id).await?
    {
        return Err(ApiError::Forbidden(format!(
            "user {} has no access to repo {}",
            user.name, repo.id
        )));
    }

    let header_token = headers
        .get("gh_token")
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let token = match header_token {
        Some(t) => Some(t),
        None => ctx
            .storage
            .get_forge_token(user.id, repo.forge_id)
            .await?
            .map(|row| row.access_token),
    };

    ctx.runner
        .run_cycle(&repo, token.as_deref())
        .await
        .map_err(|e| match e {
            CycleError::Indexer(msg) => ApiError::Upstream(msg),
            CycleError::Other(e) => ApiError::Internal(e),
        })?;

    Ok(Json(json!("ok")))
}
