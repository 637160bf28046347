//! End-to-end session tests over the in-memory hub: message flow between
//! two clients, room switching, and degraded-store behavior.

mod common;

use common::MemoryHub;
use natter::models::message::MessageDraft;
use natter::models::room::{ClientId, RoomId};
use natter::services::session::{self, SessionConfig};
use natter::{HostedChannel, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn session_config(id: &str) -> SessionConfig {
    SessionConfig {
        identity: ClientId::from(id),
        lobby: "lobby".to_string(),
        history_limit: 150,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event feed closed")
}

/// Read events until the predicate matches; panics after the timeout.
async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn alice_message_reaches_bob_ordered_after_history() {
    let hub = MemoryHub::new();
    let lobby = RoomId::lobby("lobby");

    let mut old = MessageDraft::new("Crow", ClientId::from("crow"), "old news").stamp();
    old.sent_at = chrono::Utc::now() - chrono::Duration::seconds(60);
    hub.seed(&lobby, old);

    let alice = session::spawn(session_config("alice-id"), Arc::new(hub.channel()), None);
    let bob = session::spawn(session_config("bob-id"), Arc::new(hub.channel()), None);
    let mut bob_events = bob.events();

    alice.set_name("Alice");
    alice.send("hi");

    let event = wait_for(&mut bob_events, |e| {
        matches!(e, SessionEvent::Timeline(messages) if messages.len() == 2)
    })
    .await;

    let messages = match event {
        SessionEvent::Timeline(messages) => messages,
        _ => unreachable!(),
    };
    assert_eq!(messages[0].body, "old news");
    let last = messages.last().unwrap();
    assert_eq!(last.author, "Alice");
    assert_eq!(last.body, "hi");
    assert!(messages.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
}

#[tokio::test]
async fn direct_room_is_shared_by_both_parties() {
    let hub = MemoryHub::new();
    let alice = session::spawn(session_config("alice-id"), Arc::new(hub.channel()), None);
    let bob = session::spawn(session_config("bob-id"), Arc::new(hub.channel()), None);
    let mut alice_events = alice.events();
    let mut bob_events = bob.events();

    alice.open_direct(ClientId::from("bob-id"));
    bob.open_direct(ClientId::from("alice-id"));

    let expected = RoomId::direct(&ClientId::from("alice-id"), &ClientId::from("bob-id"));
    wait_for(&mut alice_events, |e| {
        matches!(e, SessionEvent::RoomChanged(room) if *room == expected)
    })
    .await;
    wait_for(&mut bob_events, |e| {
        matches!(e, SessionEvent::RoomChanged(room) if *room == expected)
    })
    .await;

    alice.send("psst");
    wait_for(&mut bob_events, |e| {
        matches!(e, SessionEvent::Timeline(messages)
            if messages.iter().any(|m| m.body == "psst"))
    })
    .await;
}

#[tokio::test]
async fn switching_rooms_resets_the_timeline() {
    let hub = MemoryHub::new();
    let lobby = RoomId::lobby("lobby");
    hub.seed(&lobby, MessageDraft::new("Crow", ClientId::from("crow"), "lobby talk").stamp());

    let alice = session::spawn(session_config("alice-id"), Arc::new(hub.channel()), None);
    let mut events = alice.events();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Timeline(messages) if messages.len() == 1)
    })
    .await;

    alice.open_direct(ClientId::from("bob-id"));
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::RoomChanged(room) if room.as_str().starts_with("dm"))
    })
    .await;
    // The fresh room starts empty; the lobby history must not leak across.
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Timeline(messages) if messages.is_empty())
    })
    .await;
}

#[tokio::test]
async fn degraded_store_stays_interactive_with_local_echo() {
    let channel = Arc::new(HostedChannel::inert(150));
    let handle = session::spawn(session_config("solo-id"), channel, None);
    let mut events = handle.events();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::System(notice) if notice.contains("offline mode"))
    })
    .await;

    handle.set_name("Hermit");
    handle.send("anyone there?");

    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Timeline(messages) if messages.len() == 1)
    })
    .await;
    match event {
        SessionEvent::Timeline(messages) => {
            assert_eq!(messages[0].author, "Hermit");
            assert_eq!(messages[0].body, "anyone there?");
        }
        _ => unreachable!(),
    }
}
