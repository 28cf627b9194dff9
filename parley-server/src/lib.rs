//! Parley Server - multi-user LLM chat with conversation memory.
//!
//! This crate provides the Parley web application:
//! - Registration, login, and logout with JWT bearer tokens
//! - A chat API and WebSocket transport relaying messages to an upstream
//!   LLM provider
//! - Per-user conversation persistence in SQLite
//! - Threshold-triggered history summarization to bound context size
//!
//! ## Architecture
//!
//! ```text
//! Browser ⇄ (REST + WebSocket) ⇄ Parley (auth → chat turn → memory) → LLM API
//!                                           ↓
//!                                   SQLite (users, history, summaries)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod chat;
pub mod history;
pub mod memory;
pub mod provider;
pub mod routes;
pub mod user;
pub mod ws;

pub use provider::{
    AnthropicProvider, ChatRequest, ChatResponse, CompatibleProvider, Message, Provider,
    ProviderError, TokenUsage, create_provider,
};
pub use routes::{AppState, build_routes};

use axum::Router;
use parley_common::config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the router with the provider configured from `config`.
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let provider = provider::create_provider(&config.llm, config.api_key().as_deref())?;
    build_router_with_db(config, None, provider)
}

/// Build the router with a custom database path and provider.
/// This is useful for testing with isolated databases and mock providers.
pub fn build_router_with_db(
    config: &Config,
    db_path: Option<PathBuf>,
    provider: Arc<dyn Provider>,
) -> anyhow::Result<Router> {
    let state = AppState::new(config, db_path, provider)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(routes::build_routes(state).layer(cors))
}

/// Start the Parley server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.bind_address().parse::<std::net::IpAddr>()?,
        config.port(),
    ));

    let router = build_router(config)?;

    tracing::info!("Starting Parley on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
