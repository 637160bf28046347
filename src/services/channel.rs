//! Backend-neutral message channel seam.
//!
//! Both variants (hosted store, peer mesh) publish drafts and deliver
//! [`ChannelEvent`]s through one trait, so the session and the tests can
//! swap backends freely.

use crate::error::ChatResult;
use crate::models::message::{ChatMessage, MessageDraft, PresenceNote};
use crate::models::room::RoomId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events delivered by a room subscription.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Full current window of the room (hosted store). Delivered on every
    /// remote change; the consumer re-sorts via the timeline.
    Snapshot(Vec<ChatMessage>),
    /// One message received in receipt order (mesh).
    Message(ChatMessage),
    /// In-band presence announcement from a peer (mesh).
    Presence { peer_id: String, note: PresenceNote },
    /// A peer link closed; reported once per link.
    PeerClosed(String),
    /// The backend is inert (unconfigured or unreachable at start).
    Degraded(String),
}

/// A live subscription to one room.
///
/// Owns the background tasks feeding it. `close` is explicit and idempotent;
/// dropping the subscription closes it as well, but callers switching rooms
/// must close the old subscription before opening the next one.
#[derive(Debug)]
pub struct ChannelSubscription {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    tasks: Vec<JoinHandle<()>>,
    closed: AtomicBool,
}

impl ChannelSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChannelEvent>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            events,
            tasks,
            closed: AtomicBool::new(false),
        }
    }

    /// Next event, or `None` once the feed has ended.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Cancel the subscription. Safe to call more than once; only the first
    /// call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// One message backend: hosted store or peer mesh.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Open a live feed for `room`. Callers own the returned subscription
    /// and must close it before subscribing to another room.
    async fn subscribe(&self, room: &RoomId) -> ChatResult<ChannelSubscription>;

    /// Stamp the draft (id + creation time) and publish it to the room.
    /// Fire-and-forget: errors are reported to the caller, never retried.
    /// Returns the stamped message so callers can echo it locally.
    async fn publish(&self, room: &RoomId, draft: MessageDraft) -> ChatResult<ChatMessage>;

    /// Announce presence in-band. Backends with a dedicated presence
    /// collection ignore this.
    async fn publish_presence(&self, room: &RoomId, note: PresenceNote) -> ChatResult<()>;

    /// Whether the caller must append its own messages to the local
    /// timeline (no round-trip will deliver them back).
    fn echoes_locally(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            std::future::pending::<()>().await;
        });
        let sub = ChannelSubscription::new(rx, vec![task]);

        sub.close();
        assert!(sub.is_closed());
        sub.close();
        assert!(sub.is_closed());
        drop(tx);
    }

    #[tokio::test]
    async fn closed_feed_drains_remaining_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ChannelEvent::Degraded("x".to_string())).unwrap();
        drop(tx);
        let mut sub = ChannelSubscription::new(rx, Vec::new());
        assert!(matches!(sub.next_event().await, Some(ChannelEvent::Degraded(_))));
        assert!(sub.next_event().await.is_none());
    }
}
