use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::router::{EventRouter, SessionContext};

/// Server sends a WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Close the connection when a pong does not arrive within 10 seconds of a ping.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one authenticated WebSocket connection.
///
/// The socket is split: a writer task owns the sink and drains the session's
/// outbound queue, while this task reads frames and feeds them to the
/// connection's `EventRouter`. Anything holding the queue's sender (fan-out,
/// presence) can reach this client without touching the socket.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    host: Option<String>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let session_id = Uuid::new_v4();
    let user_id = identity.user_id;

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut router = EventRouter::connect(
        state,
        SessionContext {
            session_id,
            user_id,
            username: identity.username,
            tx: tx.clone(),
            host,
        },
    );

    tracing::info!(session_id = %session_id, user_id, "WebSocket session started");

    router.send_welcome();

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // First tick fires immediately
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(session_id = %session_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    router.handle_text(text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        session_id = %session_id,
                        len = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        session_id = %session_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(session_id = %session_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    // Leave, unregister and the offline edge all happen here, exactly once.
    router.close();
    drop(router);

    writer_handle.abort();

    tracing::info!(session_id = %session_id, user_id, "WebSocket session stopped");
}

/// Forward queued messages to the WebSocket sink until either side closes.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}
