//! In-process test doubles: a memory-backed message hub and directory, so
//! sessions can be exercised end-to-end without external services.

#![allow(dead_code)]

use async_trait::async_trait;
use natter::mesh::directory::{Directory, PeerAnnouncement};
use natter::models::message::{ChatMessage, MessageDraft, PresenceNote};
use natter::models::room::RoomId;
use natter::services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
use natter::ChatResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct RoomState {
    messages: Vec<ChatMessage>,
    subscribers: Vec<mpsc::UnboundedSender<ChannelEvent>>,
}

/// Shared in-memory store: every subscriber of a room gets a full snapshot
/// on every publish, like the hosted store does.
#[derive(Default)]
pub struct MemoryHub {
    rooms: Mutex<HashMap<RoomId, RoomState>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-load history without notifying anyone.
    pub fn seed(&self, room: &RoomId, message: ChatMessage) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.entry(room.clone()).or_default().messages.push(message);
    }

    pub fn channel(self: &Arc<Self>) -> MemoryChannel {
        MemoryChannel {
            hub: Arc::clone(self),
        }
    }
}

/// A `MessageChannel` over the shared hub.
pub struct MemoryChannel {
    hub: Arc<MemoryHub>,
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn subscribe(&self, room: &RoomId) -> ChatResult<ChannelSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.hub.rooms.lock().unwrap();
        let state = rooms.entry(room.clone()).or_default();
        let _ = tx.send(ChannelEvent::Snapshot(state.messages.clone()));
        state.subscribers.push(tx);
        Ok(ChannelSubscription::new(rx, Vec::new()))
    }

    async fn publish(&self, room: &RoomId, draft: MessageDraft) -> ChatResult<ChatMessage> {
        let message = draft.stamp();
        let mut rooms = self.hub.rooms.lock().unwrap();
        let state = rooms.entry(room.clone()).or_default();
        state.messages.push(message.clone());
        let snapshot = state.messages.clone();
        state
            .subscribers
            .retain(|tx| tx.send(ChannelEvent::Snapshot(snapshot.clone())).is_ok());
        Ok(message)
    }

    async fn publish_presence(&self, _room: &RoomId, _note: PresenceNote) -> ChatResult<()> {
        Ok(())
    }

    fn echoes_locally(&self) -> bool {
        false
    }
}

/// In-memory peer directory with upsert-by-id registration.
#[derive(Default)]
pub struct MemoryDirectory {
    peers: Mutex<Vec<PeerAnnouncement>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(&self, announcement: &PeerAnnouncement) -> ChatResult<()> {
        let mut peers = self.peers.lock().unwrap();
        peers.retain(|p| p.peer_id != announcement.peer_id);
        peers.push(announcement.clone());
        Ok(())
    }

    async fn peers(&self) -> ChatResult<Vec<PeerAnnouncement>> {
        Ok(self.peers.lock().unwrap().clone())
    }
}
