// rest/routes/chats.rs — chat CRUD and the chat-turn endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::chat::{ChatHistory, ChatPipeline, DEFAULT_NAME_PREFIX};
use crate::error::ApiError;
use crate::rest::auth::CurrentUser;
use crate::AppContext;

pub async fn list_chats(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let chats = ctx.storage.list_chats(user.id).await?;
    Ok(Json(json!({ "chats": chats })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub repo_id: Option<i64>,
}

pub async fn create_chat(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let repo_id = body
        .repo_id
        .ok_or_else(|| ApiError::BadRequest("repoId is required".into()))?;

    // An unlinked repo is invisible to the caller.
    if !ctx.storage.user_has_repo_access(user.id, repo_id).await? {
        return Err(ApiError::NotFound("repo"));
    }
    let repo = ctx
        .storage
        .get_repo(repo_id)
        .await?
        .ok_or(ApiError::NotFound("repo"))?;

    let name = format!("{DEFAULT_NAME_PREFIX} {}", repo.name);
    let chat = ctx.storage.create_chat(user.id, repo.id, &name).await?;
    Ok(Json(serde_json::to_value(chat).map_err(anyhow::Error::from)?))
}

pub async fn list_messages(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let chat = ctx
        .storage
        .get_chat_for_user(chat_id, user.id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;
    let messages = ctx.storage.list_chat_messages(chat.id).await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
pub struct ChatTurnRequest {
    pub message: Option<String>,
}

/// One conversational turn: validate, rebuild history, run the pipeline,
/// persist the rename (when any) and exactly two message rows, return the
/// answer. Persistence comes last so a mid-pipeline failure leaves no
/// partial history.
pub async fn chat_turn(
    State(ctx): State<Arc<AppContext>>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<i64>,
    Json(body): Json<ChatTurnRequest>,
) -> Result<Json<Value>, ApiError> {
    let chat = ctx
        .storage
        .get_chat_for_user(chat_id, user.id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;

    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("message is required".into()))?
        .to_string();

    let repo = ctx
        .storage
        .get_repo(chat.repo_id)
        .await?
        .ok_or(ApiError::NotFound("repo"))?;

    let rows = ctx.storage.list_chat_messages(chat.id).await?;
    let history = ChatHistory::from_rows(&rows);

    let pipeline = ChatPipeline::new(ctx.completions.clone(), ctx.index.clone());
    let outcome = pipeline
        .run(repo.id, &chat.name, &history, &message)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    if let Some(name) = &outcome.new_name {
        info!(chat_id = chat.id, name = %name, "chat renamed from dialog summary");
        ctx.storage.rename_chat(chat.id, name).await?;
    }
    ctx.storage
        .append_chat_turn(chat.id, &message, &outcome.answer)
        .await?;

    Ok(Json(json!({ "answer": outcome.answer })))
}
