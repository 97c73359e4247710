// rest/mod.rs — the HTTP JSON API.
//
// Endpoints:
//   GET  /api/health
//   GET  /api/forges/{forge_id}/login
//   GET  /api/forges/{forge_id}/callback
//   GET  /api/forges/{forge_id}/repos
//   POST /api/forges/{forge_id}/repos/add
//   GET  /api/repos/{repo_id}
//   POST /api/repos/{repo_id}/clone
//   GET  /api/chats
//   POST /api/chats
//   GET  /api/chats/{chat_id}/messages
//   POST /api/chats/{chat_id}/chat

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/health", get(routes::health::health))
        // OAuth handshake (no auth — it creates the session)
        .route("/api/forges/{forge_id}/login", get(routes::forges::login))
        .route("/api/forges/{forge_id}/callback", get(routes::forges::callback))
        // Forge repo browsing & import
        .route("/api/forges/{forge_id}/repos", get(routes::forges::search_repos))
        .route("/api/forges/{forge_id}/repos/add", post(routes::forges::add_repo))
        // Repos
        .route("/api/repos/{repo_id}", get(routes::repos::get_repo))
        .route("/api/repos/{repo_id}/clone", post(routes::repos::clone_repo))
        // Chats
        .route(
            "/api/chats",
            get(routes::chats::list_chats).post(routes::chats::create_chat),
        )
        .route("/api/chats/{chat_id}/messages", get(routes::chats::list_messages))
        .route("/api/chats/{chat_id}/chat", post(routes::chats::chat_turn))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
