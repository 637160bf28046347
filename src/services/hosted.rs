//! Hosted-store message channel: bounded-window snapshots with pub/sub
//! change notification, degrading to an inert local-echo channel when the
//! store is unconfigured or unreachable.

use crate::error::ChatResult;
use crate::models::message::{ChatMessage, MessageDraft, PresenceNote};
use crate::models::room::RoomId;
use crate::repositories::StoreRepository;
use crate::services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Message channel backed by the hosted keyed store.
#[derive(Clone)]
pub struct HostedChannel {
    repo: Option<Arc<StoreRepository>>,
    window: usize,
}

impl HostedChannel {
    pub fn new(repo: Arc<StoreRepository>, window: usize) -> Self {
        Self {
            repo: Some(repo),
            window,
        }
    }

    /// Channel with no backing store: subscriptions report the degraded
    /// condition once and publish keeps messages local.
    pub fn inert(window: usize) -> Self {
        Self { repo: None, window }
    }

    pub fn is_inert(&self) -> bool {
        self.repo.is_none()
    }

    fn degraded_subscription(reason: String) -> ChannelSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChannelEvent::Degraded(reason));
        ChannelSubscription::new(rx, Vec::new())
    }
}

#[async_trait]
impl MessageChannel for HostedChannel {
    async fn subscribe(&self, room: &RoomId) -> ChatResult<ChannelSubscription> {
        let repo = match &self.repo {
            Some(repo) => Arc::clone(repo),
            None => {
                return Ok(Self::degraded_subscription(
                    "store not configured; messages stay local".to_string(),
                ))
            }
        };

        // An unreachable store degrades the subscription instead of failing
        // the caller; publish failures are reported separately.
        let mut notify = match repo.subscribe_room(room).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(room = %room, error = %e, "store unreachable, subscription inert");
                return Ok(Self::degraded_subscription(format!("store unreachable: {}", e)));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let room = room.clone();
        let window = self.window;

        let task = tokio::spawn(async move {
            match repo.room_window(&room, window).await {
                Ok(snapshot) => {
                    if tx.send(ChannelEvent::Snapshot(snapshot)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(room = %room, error = %e, "initial window fetch failed"),
            }

            loop {
                match notify.recv().await {
                    // A lagged receiver still wants the latest window.
                    Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        match repo.room_window(&room, window).await {
                            Ok(snapshot) => {
                                if tx.send(ChannelEvent::Snapshot(snapshot)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(room = %room, error = %e, "window re-fetch failed"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ChannelSubscription::new(rx, vec![task]))
    }

    async fn publish(&self, room: &RoomId, draft: MessageDraft) -> ChatResult<ChatMessage> {
        let message = draft.stamp();
        match &self.repo {
            Some(repo) => repo.append_message(room, &message, self.window).await?,
            None => debug!(room = %room, "store not configured; message kept local"),
        }
        Ok(message)
    }

    async fn publish_presence(&self, _room: &RoomId, _note: PresenceNote) -> ChatResult<()> {
        // Presence rides the dedicated tracker on this backend.
        Ok(())
    }

    fn echoes_locally(&self) -> bool {
        self.repo.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::room::ClientId;

    #[tokio::test]
    async fn inert_channel_reports_degraded_once() {
        let channel = HostedChannel::inert(150);
        let mut sub = channel.subscribe(&RoomId::lobby("lobby")).await.unwrap();
        assert!(matches!(sub.next_event().await, Some(ChannelEvent::Degraded(_))));
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn inert_publish_still_stamps_for_local_echo() {
        let channel = HostedChannel::inert(150);
        assert!(channel.echoes_locally());
        let draft = MessageDraft::new("Alice", ClientId::from("c1"), "hi");
        let message = channel
            .publish(&RoomId::lobby("lobby"), draft)
            .await
            .unwrap();
        assert!(!message.id.is_empty());
        assert_eq!(message.body, "hi");
    }
}
