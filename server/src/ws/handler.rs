use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::{header::HOST, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::{self, middleware::bearer_token, AuthError};
use crate::state::AppState;
use crate::ws::actor;

/// Token may come as `?access_token=` or as a Bearer header.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub access_token: Option<String>,
}

/// WebSocket close codes for auth failures after upgrade.
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws
/// No token at all is rejected with 401 before upgrading. A bad token upgrades
/// and then closes with 4001 (expired) or 4002 (invalid).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers));

    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Missing access token").into_response();
    };

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match auth::resolve(&state.jwt_secret, token) {
        Ok(identity) => {
            tracing::info!(
                user_id = identity.user_id,
                username = %identity.username,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity, host))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(close_code, reason, "WebSocket auth failed");

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
