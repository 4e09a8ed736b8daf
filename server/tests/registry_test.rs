//! Session registry and fan-out tests: room membership, per-user delivery,
//! best-effort sends and the presence edge invariant.

use axum::extract::ws::Message;
use duet_server::ws::broadcast::{broadcast, send_to_session, send_to_user, send_to_users};
use duet_server::ws::events::ServerEvent;
use duet_server::ws::{ConnectionSender, SessionRegistry};
use proptest::prelude::*;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

fn channel() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
    mpsc::unbounded_channel()
}

fn error_event(text: &str) -> ServerEvent {
    ServerEvent::Error {
        error: text.to_string(),
    }
}

/// Collect every text frame currently queued, parsed as JSON.
fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            out.push(serde_json::from_str(text.as_str()).expect("valid JSON frame"));
        }
    }
    out
}

#[test]
fn broadcast_reaches_room_members_except_excluded() {
    let registry = SessionRegistry::new();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    let (tx_c, mut rx_c) = channel();

    registry.register(a, 1, "alice", tx_a);
    registry.register(b, 2, "bob", tx_b);
    registry.register(c, 3, "carol", tx_c);
    registry.join("r1", &a);
    registry.join("r1", &b);
    registry.join("r2", &c);

    let delivered = broadcast(&registry, "r1", &error_event("hello"), Some(&a));
    assert_eq!(delivered, 1);

    assert!(drain(&mut rx_a).is_empty());
    let got = drain(&mut rx_b);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["event"], "error");
    assert_eq!(got[0]["error"], "hello");
    assert!(drain(&mut rx_c).is_empty(), "other rooms must not see the event");
}

#[test]
fn broadcast_to_empty_room_delivers_nothing() {
    let registry = SessionRegistry::new();
    assert_eq!(broadcast(&registry, "nowhere", &error_event("x"), None), 0);
}

#[test]
fn closed_session_does_not_stop_delivery_to_others() {
    let registry = SessionRegistry::new();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, mut rx_a) = channel();
    let (tx_b, rx_b) = channel();
    let (tx_c, mut rx_c) = channel();

    registry.register(a, 1, "alice", tx_a);
    registry.register(b, 2, "bob", tx_b);
    registry.register(c, 3, "carol", tx_c);
    for id in [&a, &b, &c] {
        registry.join("r1", id);
    }

    // Bob's writer is gone but his session has not been unregistered yet
    drop(rx_b);

    let delivered = broadcast(&registry, "r1", &error_event("still here"), None);
    assert_eq!(delivered, 2);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_c).len(), 1);
}

#[test]
fn send_to_user_reaches_every_device() {
    let registry = SessionRegistry::new();
    let (phone, laptop, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx_p, mut rx_p) = channel();
    let (tx_l, mut rx_l) = channel();
    let (tx_o, mut rx_o) = channel();

    registry.register(phone, 1, "alice", tx_p);
    registry.register(laptop, 1, "alice", tx_l);
    registry.register(other, 2, "bob", tx_o);

    assert_eq!(send_to_user(&registry, 1, &error_event("ping")), 2);
    assert_eq!(drain(&mut rx_p).len(), 1);
    assert_eq!(drain(&mut rx_l).len(), 1);
    assert!(drain(&mut rx_o).is_empty());

    assert_eq!(send_to_user(&registry, 99, &error_event("nobody")), 0);
    assert_eq!(send_to_users(&registry, &[1, 2, 99], &error_event("all")), 3);
}

#[test]
fn send_to_session_reports_closed_queue() {
    let (tx, rx) = channel();
    assert!(send_to_session(&tx, &error_event("one")));
    drop(rx);
    assert!(!send_to_session(&tx, &error_event("two")));
}

#[test]
fn sessions_of_returns_one_handle_per_device() {
    let registry = SessionRegistry::new();
    registry.register(Uuid::new_v4(), 1, "alice", channel().0);
    registry.register(Uuid::new_v4(), 1, "alice", channel().0);
    assert_eq!(registry.sessions_of(1).len(), 2);
    assert!(registry.sessions_of(2).is_empty());
    assert_eq!(registry.session_count(), 2);
}

#[derive(Debug, Clone)]
enum Op {
    Register { user: i64 },
    Unregister { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..4).prop_map(|user| Op::Register { user }),
        (0usize..16).prop_map(|pick| Op::Unregister { pick }),
    ]
}

proptest! {
    /// `register` reports true exactly when a user goes 0 -> 1 sessions and
    /// `unregister` exactly when 1 -> 0, for any interleaving.
    #[test]
    fn presence_edges_match_session_counts(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let registry = SessionRegistry::new();
        let mut live: Vec<(Uuid, i64)> = Vec::new();
        let mut counts: HashMap<i64, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Register { user } => {
                    let id = Uuid::new_v4();
                    let before = counts.get(&user).copied().unwrap_or(0);
                    let online_edge = registry.register(id, user, "u", channel().0);
                    prop_assert_eq!(online_edge, before == 0);
                    *counts.entry(user).or_default() += 1;
                    live.push((id, user));
                }
                Op::Unregister { pick } => {
                    if live.is_empty() {
                        prop_assert!(!registry.unregister(&Uuid::new_v4()));
                        continue;
                    }
                    let (id, user) = live.remove(pick % live.len());
                    let count = counts.get_mut(&user).unwrap();
                    let offline_edge = registry.unregister(&id);
                    prop_assert_eq!(offline_edge, *count == 1);
                    *count -= 1;
                    // A second unregister of the same id is a no-op
                    prop_assert!(!registry.unregister(&id));
                }
            }

            for (&user, &count) in &counts {
                prop_assert_eq!(registry.is_user_online(user), count > 0);
                prop_assert_eq!(registry.count_sessions(user), count);
            }
        }
    }
}
