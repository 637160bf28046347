//! Mesh integration: two channels discover each other through an in-memory
//! directory and exchange messages over real local sockets.

mod common;

use common::MemoryDirectory;
use natter::mesh::MeshChannel;
use natter::models::message::MessageDraft;
use natter::models::room::{ClientId, RoomId};
use natter::services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const SCAN: Duration = Duration::from_millis(200);

async fn wait_for<F>(sub: &mut ChannelSubscription, mut pred: F) -> ChannelEvent
where
    F: FnMut(&ChannelEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(10), sub.next_event())
            .await
            .expect("timed out waiting for channel event")
            .expect("channel feed closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn bind(directory: &Arc<MemoryDirectory>, id: &str) -> MeshChannel {
    MeshChannel::bind(
        Arc::clone(directory) as Arc<dyn natter::mesh::directory::Directory>,
        ClientId::from(id),
        "127.0.0.1:0".parse().unwrap(),
        SCAN,
    )
    .await
    .expect("mesh bind failed")
}

#[tokio::test]
async fn peers_discover_each_other_and_chat() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = bind(&directory, "alice-id").await;
    let bob = bind(&directory, "bob-id").await;

    let lobby = RoomId::lobby("lobby");
    let mut alice_sub = alice.subscribe(&lobby).await.unwrap();
    let mut bob_sub = bob.subscribe(&lobby).await.unwrap();

    // Both sides announce themselves once a link opens.
    wait_for(&mut alice_sub, |e| {
        matches!(e, ChannelEvent::Presence { note, .. } if note.client_id == ClientId::from("bob-id"))
    })
    .await;
    wait_for(&mut bob_sub, |e| {
        matches!(e, ChannelEvent::Presence { note, .. } if note.client_id == ClientId::from("alice-id"))
    })
    .await;

    let draft = MessageDraft::new("Alice", ClientId::from("alice-id"), "over the wire");
    let sent = alice.publish(&lobby, draft).await.unwrap();
    assert!(alice.echoes_locally());

    let event = wait_for(&mut bob_sub, |e| {
        matches!(e, ChannelEvent::Message(m) if m.body == "over the wire")
    })
    .await;
    match event {
        ChannelEvent::Message(received) => {
            assert_eq!(received.id, sent.id);
            assert_eq!(received.author, "Alice");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn peers_in_other_rooms_are_ignored() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = bind(&directory, "alice-id").await;
    let stranger = bind(&directory, "stranger-id").await;

    let lobby = RoomId::lobby("lobby");
    let elsewhere = RoomId::lobby("elsewhere");
    let mut alice_sub = alice.subscribe(&lobby).await.unwrap();
    let _stranger_sub = stranger.subscribe(&elsewhere).await.unwrap();

    // Give discovery a few cycles; no presence may ever arrive.
    let outcome = timeout(SCAN * 5, alice_sub.next_event()).await;
    assert!(
        outcome.is_err(),
        "expected no events from a different room, got {:?}",
        outcome
    );
}
