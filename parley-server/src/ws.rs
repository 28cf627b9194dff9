//! WebSocket chat transport.
//!
//! Bidirectional message delivery between the browser and the server.
//! Each inbound `message` event runs one chat turn and answers with a
//! `response` event; failures become `error` events on the same socket.

use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use parley_common::Error;
use serde::{Deserialize, Serialize};

/// Query parameters for the WebSocket handshake.
///
/// Browsers cannot set headers on WebSocket connections, so the token is
/// usually passed as a query parameter; the `Authorization` header is also
/// accepted for non-browser clients.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Events sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A chat message from the user
    Message { content: String },
}

/// Events sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement after a successful upgrade
    Connected { user_id: String },
    /// Assistant response to a chat message
    Response { content: String },
    /// A failed turn or malformed event
    Error { message: String, code: String },
}

/// WebSocket upgrade handler.
///
/// The token is validated before the upgrade; unauthenticated connections
/// are rejected with 401.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));

    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let claims = match state.auth.validate_token(&token) {
        Ok(claims) => claims,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let user_id = claims.sub;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Extract a bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

/// Drive one authenticated chat connection.
async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: String) {
    tracing::info!(user_id = %user_id, "WebSocket connected");

    let hello = ServerEvent::Connected {
        user_id: user_id.clone(),
    };
    if send_event(&mut socket, &hello).await.is_err() {
        return;
    }

    while let Some(frame) = socket.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };

        match frame {
            WsMessage::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(_) => {
                        let error = ServerEvent::Error {
                            message: "Malformed event".into(),
                            code: "WS_BAD_EVENT".into(),
                        };
                        if send_event(&mut socket, &error).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let ClientEvent::Message { content } = event;

                let reply = match state.chat.send(&user_id, &content).await {
                    Ok(reply) => ServerEvent::Response {
                        content: reply.content,
                    },
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Chat turn failed");
                        event_for_error(&e)
                    }
                };

                if send_event(&mut socket, &reply).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            // Pings are answered by axum; binary frames are ignored
            _ => {}
        }
    }

    tracing::info!(user_id = %user_id, "WebSocket disconnected");
}

/// Serialize and send a server event.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(WsMessage::Text(payload)).await
}

/// Map a service error to an error event.
fn event_for_error(error: &Error) -> ServerEvent {
    let code = match error {
        Error::InvalidInput(_) => "CHAT_INVALID_INPUT",
        Error::External(_) => "CHAT_UPSTREAM_ERROR",
        _ => "CHAT_ERROR",
    };

    ServerEvent::Error {
        message: error.to_string(),
        code: code.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parses() {
        let json = r#"{"type": "message", "data": {"content": "Hello"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        let ClientEvent::Message { content } = event;
        assert_eq!(content, "Hello");
    }

    #[test]
    fn test_client_event_rejects_unknown_type() {
        let json = r#"{"type": "upload", "data": {"content": "Hello"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::Response {
            content: "Hi!".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"response""#));
        assert!(json.contains(r#""content":"Hi!""#));

        let event = ServerEvent::Connected {
            user_id: "u1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"connected""#));
    }

    #[test]
    fn test_event_for_error_codes() {
        let event = event_for_error(&Error::External("down".into()));
        let ServerEvent::Error { code, .. } = event else {
            panic!("expected error event");
        };
        assert_eq!(code, "CHAT_UPSTREAM_ERROR");

        let event = event_for_error(&Error::InvalidInput("empty".into()));
        let ServerEvent::Error { code, .. } = event else {
            panic!("expected error event");
        };
        assert_eq!(code, "CHAT_INVALID_INPUT");
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
