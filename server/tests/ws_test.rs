//! End-to-end WebSocket tests: auth on upgrade, room fan-out, seen receipts,
//! new-message hints and presence.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = duet_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = duet_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = duet_server::state::AppState::new(
        db,
        jwt_secret,
        duet_server::state::ChatSettings::default(),
    );
    let app = duet_server::routes::build_router(state, tmp_dir.path().join("uploads"));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr)
}

/// Register and log in a user, returning (user_id, access_token).
async fn register_user(base_url: &str, username: &str) -> (i64, String) {
    let client = reqwest::Client::new();
    let creds = json!({ "username": username, "password": "correct horse" });

    let resp = client
        .post(format!("{}/api/register", base_url))
        .json(&creds)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {}", username);

    let resp = client
        .post(format!("{}/api/login", base_url))
        .json(&creds)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Login failed for {}", username);
    let body: Value = resp.json().await.unwrap();

    (
        body["user"]["id"].as_i64().unwrap(),
        body["access_token"].as_str().unwrap().to_string(),
    )
}

async fn direct_room(base_url: &str, token: &str, recipient_id: i64) -> String {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/rooms/direct", base_url))
        .bearer_auth(token)
        .json(&json!({ "recipient_id": recipient_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["room_id"].as_str().unwrap().to_string()
}

/// Connect and consume the welcome frame.
async fn connect(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let url = format!("ws://{}/ws?access_token={}", addr, token);
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    let (write, mut read) = stream.split();

    let welcome = next_event(&mut read, "connected").await;
    assert_eq!(welcome["message"], "Welcome to the chat server");

    (write, read)
}

async fn send(write: &mut WsWrite, frame: Value) {
    write.send(Message::text(frame.to_string())).await.unwrap();
}

/// Wait for the next event named `name`, skipping anything else.
async fn next_event(read: &mut WsRead, name: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let msg = tokio::time::timeout_at(deadline, read.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
            .expect("stream ended")
            .expect("receive error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["event"] == name {
                return value;
            }
        }
    }
}

/// Assert no event named `name` arrives within `wait`.
async fn assert_no_event(read: &mut WsRead, name: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(value["event"], name, "unexpected {name}: {value}");
            }
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return,
        }
    }
}

#[tokio::test]
async fn upgrade_without_token_is_unauthorized() {
    let (_base_url, addr) = start_test_server().await;

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect_err("upgrade must be refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_token_closes_with_4002() {
    let (_base_url, addr) = start_test_server().await;

    let url = format!("ws://{}/ws?access_token=garbage", addr);
    let (mut stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("receive error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4002),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_is_broadcast_to_everyone_in_the_room() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;
    let (mut b_write, mut b_read) = connect(addr, &bob_token).await;

    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    let joined = next_event(&mut a_read, "joined").await;
    assert_eq!(joined["room"], room.as_str());
    let history = next_event(&mut a_read, "history").await;
    assert_eq!(history["history"], json!([]));
    assert_eq!(history["otherUser"]["username"], "bob");
    assert_eq!(history["otherUser"]["photos"], json!([]));
    assert!(history.get("other_user").is_none());

    send(&mut b_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut b_read, "joined").await;
    let join = next_event(&mut a_read, "join").await;
    assert_eq!(join["username"], "bob");

    send(&mut a_write, json!({ "event": "chat", "text": "hi bob" })).await;

    let to_bob = next_event(&mut b_read, "chat").await;
    assert_eq!(to_bob["text"], "hi bob");
    assert_eq!(to_bob["username"], "alice");
    assert_eq!(to_bob["room"], room.as_str());
    assert_eq!(to_bob["has_seen"], false);

    // The sender gets its own message back as confirmation
    let to_alice = next_event(&mut a_read, "chat").await;
    assert_eq!(to_alice["id"], to_bob["id"]);

    // Bob is looking at the room, so no hint is sent
    assert_no_event(&mut b_read, "new_message", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn history_marks_own_messages_and_resolves_replies() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;
    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut a_read, "history").await;

    send(&mut a_write, json!({ "event": "chat", "text": "question?" })).await;
    let first = next_event(&mut a_read, "chat").await;

    let (mut b_write, mut b_read) = connect(addr, &bob_token).await;
    send(&mut b_write, json!({ "event": "join", "room": room })).await;
    let history = next_event(&mut b_read, "history").await;
    let items = history["history"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["is_your_message"], false);
    assert_eq!(items[0]["event"], "chat");

    send(
        &mut b_write,
        json!({ "event": "chat", "text": "answer", "reply_to_id": first["id"] }),
    )
    .await;
    let reply = next_event(&mut a_read, "chat").await;
    assert_eq!(reply["reply_to"]["id"], first["id"]);
    assert_eq!(reply["reply_to"]["text"], "question?");
    assert_eq!(reply["reply_to"]["username"], "alice");
}

#[tokio::test]
async fn empty_chat_is_rejected_and_not_stored() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, _bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut write, mut read) = connect(addr, &alice_token).await;
    send(&mut write, json!({ "event": "join", "room": room })).await;
    next_event(&mut read, "history").await;

    send(&mut write, json!({ "event": "chat", "text": "" })).await;
    let err = next_event(&mut read, "error").await;
    assert_eq!(err["error"], "message must have either text or voice");

    // Rejoining shows nothing was persisted
    send(&mut write, json!({ "event": "join", "room": room })).await;
    let history = next_event(&mut read, "history").await;
    assert_eq!(history["history"], json!([]));
}

#[tokio::test]
async fn chat_before_join_is_ignored() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;

    let (mut write, mut read) = connect(addr, &alice_token).await;
    send(&mut write, json!({ "event": "chat", "text": "into the void" })).await;
    send(&mut write, json!("not an object")).await;
    send(&mut write, json!({ "event": "dance" })).await;

    // The connection survives all of the above
    send(&mut write, json!({ "event": "list" })).await;
    let list = next_event(&mut read, "list").await;
    assert_eq!(list["rooms"], json!([]));
}

#[tokio::test]
async fn new_message_hint_reaches_online_participant_outside_the_room() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;
    let (_b_write, mut b_read) = connect(addr, &bob_token).await;

    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut a_read, "history").await;

    send(&mut a_write, json!({ "event": "chat", "voice": "clip.webm" })).await;

    let hint = next_event(&mut b_read, "new_message").await;
    assert_eq!(hint["room"], room.as_str());
    assert_eq!(hint["sender_username"], "alice");
    assert_eq!(hint["type"], "voice");
    assert!(hint.get("text").is_none(), "hints carry no body");

    // Bob never receives the chat event itself
    assert_no_event(&mut b_read, "chat", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn seen_in_seconds_marks_messages_and_notifies_room() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;
    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut a_read, "history").await;
    send(&mut a_write, json!({ "event": "chat", "text": "did you see this?" })).await;
    next_event(&mut a_read, "chat").await;

    let (mut b_write, mut b_read) = connect(addr, &bob_token).await;
    send(&mut b_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut b_read, "history").await;

    let seen_secs = chrono::Utc::now().timestamp() + 5;
    send(&mut b_write, json!({ "event": "seen", "timestamp": seen_secs })).await;

    let ack = next_event(&mut b_read, "seen_successful").await;
    assert_eq!(ack["timestamp"], seen_secs);
    assert_eq!(ack["username"], "bob");

    let receipt = next_event(&mut a_read, "messages_seen").await;
    assert_eq!(receipt["seen_by"], bob_id);
    assert_eq!(receipt["count"], 1);

    // History now reflects the receipt
    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    let history = next_event(&mut a_read, "history").await;
    assert_eq!(history["history"][0]["has_seen"], true);
}

#[tokio::test]
async fn seen_without_timestamp_is_ignored() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, _bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut write, mut read) = connect(addr, &alice_token).await;
    send(&mut write, json!({ "event": "join", "room": room })).await;
    next_event(&mut read, "history").await;

    send(&mut write, json!({ "event": "seen" })).await;
    send(&mut write, json!({ "event": "seen", "timestamp": 0 })).await;
    assert_no_event(&mut read, "seen_successful", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn second_leave_is_a_no_op() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;
    let (mut b_write, mut b_read) = connect(addr, &bob_token).await;

    send(&mut a_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut a_read, "history").await;
    send(&mut b_write, json!({ "event": "join", "room": room })).await;
    next_event(&mut b_read, "history").await;

    send(&mut b_write, json!({ "event": "leave" })).await;
    let leave = next_event(&mut a_read, "leave").await;
    assert_eq!(leave["username"], "bob");

    send(&mut b_write, json!({ "event": "leave" })).await;
    assert_no_event(&mut a_read, "leave", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn presence_edges_reach_room_partners() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob").await;
    let room = direct_room(&base_url, &alice_token, bob_id).await;

    let (mut a_write, mut a_read) = connect(addr, &alice_token).await;

    let (b_write, b_read) = connect(addr, &bob_token).await;
    let online = next_event(&mut a_read, "user_status").await;
    assert_eq!(online["user_id"], bob_id);
    assert_eq!(online["status"], "online");

    // A second device is not a new edge
    let (b2_write, b2_read) = connect(addr, &bob_token).await;
    assert_no_event(&mut a_read, "user_status", Duration::from_millis(300)).await;

    send(&mut a_write, json!({ "event": "list" })).await;
    let list = next_event(&mut a_read, "list").await;
    assert_eq!(list["rooms"][0]["room_id"], room.as_str());
    assert_eq!(list["rooms"][0]["other_user_id"], bob_id);
    assert_eq!(list["rooms"][0]["other_user_status"], "online");

    drop((b_write, b_read));
    assert_no_event(&mut a_read, "user_status", Duration::from_millis(300)).await;

    drop((b2_write, b2_read));
    let offline = next_event(&mut a_read, "user_status").await;
    assert_eq!(offline["user_id"], bob_id);
    assert_eq!(offline["status"], "offline");

    let users: Value = reqwest::Client::new()
        .get(format!("{}/api/users", base_url))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert_eq!(users[0]["status"], "offline");
    assert_ne!(users[0]["id"], alice_id);
}
