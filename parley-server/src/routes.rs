//! Route definitions for Parley.
//!
//! Provides HTTP endpoints for registration, authentication, chat, history,
//! and health checks. The realtime WebSocket endpoint lives in [`crate::ws`].

use crate::auth::{auth_middleware, AuthState, AuthUser};
use crate::chat::ChatService;
use crate::history::{HistoryMessage, HistoryStore, MessageRole, Summary};
use crate::provider::{Provider, TokenUsage};
use crate::user::{CreateUserRequest, User, UserStore};
use axum::{
    extract::{Extension, State},
    http::StatusCode,
    middleware,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use parley_common::config::Config;
use parley_common::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub users: Arc<UserStore>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Build the application state from configuration.
    ///
    /// `db_path` overrides the configured database location; useful for
    /// testing with isolated databases.
    pub fn new(
        config: &Config,
        db_path: Option<PathBuf>,
        provider: Arc<dyn Provider>,
    ) -> anyhow::Result<Self> {
        let db_path = db_path.unwrap_or_else(|| config.database.resolve_path());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let users = Arc::new(UserStore::new(&db_path)?);
        let store = Arc::new(HistoryStore::new(&db_path)?);
        let auth = AuthState::new(config.jwt_secret(), config.auth.token_expiry_secs);
        let chat = Arc::new(ChatService::new(
            store,
            provider,
            &config.llm,
            config.memory.clone(),
        ));

        Ok(Self { auth, users, chat })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
    pub user: UserResponse,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// User response (sanitized user data).
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            created_at: user.created_at.to_rfc3339(),
            last_login_at: user.last_login_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Chat send request body.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Chat send response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub reply: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// A history message as exposed over the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

impl From<HistoryMessage> for MessageView {
    fn from(message: HistoryMessage) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// A summary as exposed over the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryView {
    pub id: i64,
    pub content: String,
    pub created_at: i64,
}

impl From<Summary> for SummaryView {
    fn from(summary: Summary) -> Self {
        Self {
            id: summary.id,
            content: summary.content,
            created_at: summary.created_at,
        }
    }
}

/// Conversation history response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub summaries: Vec<SummaryView>,
    pub messages: Vec<MessageView>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Build the complete router with all routes.
pub fn build_routes(state: AppState) -> Router {
    let auth_state = state.auth.clone();

    let app_routes = Router::new()
        // Chat page (public; the page itself talks to the API)
        .route("/", get(index_handler))
        // Auth routes (public)
        .route("/api/v1/auth/register", post(register_handler))
        .route("/api/v1/auth/login", post(login_handler))
        // Auth routes (authenticated)
        .route(
            "/api/v1/auth/logout",
            post(logout_handler).layer(middleware::from_fn_with_state(
                auth_state.clone(),
                auth_middleware,
            )),
        )
        .route(
            "/api/v1/auth/me",
            get(me_handler).layer(middleware::from_fn_with_state(
                auth_state.clone(),
                auth_middleware,
            )),
        )
        // Chat routes (authenticated)
        .route(
            "/api/v1/chat/history",
            get(history_handler).layer(middleware::from_fn_with_state(
                auth_state.clone(),
                auth_middleware,
            )),
        )
        .route(
            "/api/v1/chat/send",
            post(send_handler).layer(middleware::from_fn_with_state(
                auth_state.clone(),
                auth_middleware,
            )),
        )
        // Realtime chat (does its own token validation during the handshake)
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state);

    Router::new().merge(app_routes).merge(health_routes())
}

/// Build health check routes.
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Registration handler. Open to anyone.
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), (StatusCode, Json<ErrorResponse>)> {
    let user = state.users.create(&request).map_err(|e| {
        let error_msg = e.to_string();

        // Check for duplicate username
        if error_msg.contains("UNIQUE constraint") {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "Username already exists".into(),
                    code: "USER_EXISTS".into(),
                }),
            );
        }

        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error_msg,
                code: "USER_CREATE_ERROR".into(),
            }),
        )
    })?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Login handler with password verification.
async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Validate input
    if request.username.is_empty() || request.password.is_empty() {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid credentials".into(),
                code: "AUTH_INVALID_CREDENTIALS".into(),
            }),
        ));
    }

    // Verify credentials
    let user = state
        .users
        .verify_password(&request.username, &request.password)
        .map_err(|e| {
            tracing::error!(error = %e, "Password verification error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Authentication error".into(),
                    code: "AUTH_ERROR".into(),
                }),
            )
        })?;

    let Some(user) = user else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid credentials".into(),
                code: "AUTH_INVALID_CREDENTIALS".into(),
            }),
        ));
    };

    // Generate token
    let token = state.auth.generate_token(&user.id).map_err(|e| {
        tracing::error!(error = %e, "Failed to generate token");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to generate token".into(),
                code: "AUTH_TOKEN_ERROR".into(),
            }),
        )
    })?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        token,
        expires_in: state.auth.token_expiry_secs,
        user: user.into(),
    }))
}

/// Logout handler: revokes the presented token.
async fn logout_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.auth.revoke(&auth_user.jti).map_err(|e| {
        tracing::error!(error = %e, "Failed to revoke token");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to log out".into(),
                code: "AUTH_LOGOUT_ERROR".into(),
            }),
        )
    })?;

    tracing::info!(user_id = %auth_user.user_id, "User logged out");

    Ok(StatusCode::NO_CONTENT)
}

/// Get current user info.
async fn me_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = state
        .users
        .get(&auth_user.user_id)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get user");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to get user".into(),
                    code: "USER_ERROR".into(),
                }),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "User not found".into(),
                    code: "USER_NOT_FOUND".into(),
                }),
            )
        })?;

    Ok(Json(user.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Get the authenticated user's conversation history.
async fn history_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let view = state
        .chat
        .conversation(&auth_user.user_id)
        .map_err(|e| error_response(&e))?;

    Ok(Json(HistoryResponse {
        summaries: view.summaries.into_iter().map(Into::into).collect(),
        messages: view.messages.into_iter().map(Into::into).collect(),
    }))
}

/// Run one chat turn for the authenticated user.
async fn send_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let reply = state
        .chat
        .send(&auth_user.user_id, &request.content)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(SendMessageResponse {
        reply: reply.content,
        usage: reply.usage,
        latency_ms: reply.latency_ms,
    }))
}

/// Map a service error to an HTTP error response.
fn error_response(error: &Error) -> (StatusCode, Json<ErrorResponse>) {
    let code = match error {
        Error::InvalidInput(_) => "CHAT_INVALID_INPUT",
        Error::External(_) => "CHAT_UPSTREAM_ERROR",
        Error::Auth(_) => "AUTH_ERROR",
        Error::NotFound(_) => "NOT_FOUND",
        _ => "INTERNAL_ERROR",
    };

    let status = StatusCode::from_u16(error.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.into(),
        }),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Page & Health Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Serve the embedded chat page.
async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "parley-server".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_mapping() {
        let (status, body) = error_response(&Error::External("provider down".into()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "CHAT_UPSTREAM_ERROR");

        let (status, body) = error_response(&Error::InvalidInput("empty".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "CHAT_INVALID_INPUT");

        let (status, body) = error_response(&Error::Internal("oops".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_user_response_from_user() {
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            password_hash: "secret-hash".into(),
            created_at: chrono::Utc::now(),
            last_login_at: None,
        };

        let response: UserResponse = user.into();
        assert_eq!(response.id, "u1");
        assert_eq!(response.username, "alice");
        assert!(response.last_login_at.is_none());

        // The hash must never serialize
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
