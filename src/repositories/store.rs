//! Hosted store access: room message windows, presence records, and
//! change notification via pub/sub.

use crate::error::ChatResult;
use crate::models::message::ChatMessage;
use crate::models::presence::PresenceEntry;
use crate::models::room::{ClientId, RoomId};
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const ROOM_PREFIX: &str = "natter:room:";
const PRESENCE_KEY_PREFIX: &str = "natter:presence:";
const PRESENCE_CHANNEL: &str = "natter:presence";

fn messages_key(room: &RoomId) -> String {
    format!("{}{}:messages", ROOM_PREFIX, room)
}

fn room_channel(room: &RoomId) -> String {
    format!("{}{}:events", ROOM_PREFIX, room)
}

fn presence_key(client: &ClientId) -> String {
    format!("{}{}", PRESENCE_KEY_PREFIX, client)
}

/// Store-backed repository: per-room message lists with pub/sub change
/// notification, and TTL'd presence records.
#[derive(Clone)]
pub struct StoreRepository {
    client: Arc<redis::Client>,
}

impl StoreRepository {
    /// Create repository from a store URL.
    pub fn new(store_url: &str) -> ChatResult<Self> {
        let client = redis::Client::open(store_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get a multiplexed connection for commands (append, fetch, etc.).
    async fn connection(&self) -> ChatResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Append a message to the room's list, trim to the window cap, and
    /// notify subscribers of the change.
    pub async fn append_message(
        &self,
        room: &RoomId,
        message: &ChatMessage,
        window: usize,
    ) -> ChatResult<()> {
        let mut conn = self.connection().await?;
        let key = messages_key(room);
        let payload = serde_json::to_string(message)?;
        conn.rpush::<_, _, ()>(&key, payload).await?;
        conn.ltrim::<_, ()>(&key, -(window as isize), -1).await?;
        conn.publish::<_, _, ()>(room_channel(room), "changed").await?;
        debug!(room = %room, id = %message.id, "message appended");
        Ok(())
    }

    /// Fetch the room's current bounded window, oldest first as stored.
    /// Entries that fail to parse are skipped.
    pub async fn room_window(&self, room: &RoomId, window: usize) -> ChatResult<Vec<ChatMessage>> {
        let mut conn = self.connection().await?;
        let key = messages_key(room);
        let raw: Vec<String> = conn.lrange(&key, -(window as isize), -1).await?;
        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<ChatMessage>(&entry) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(room = %room, error = %e, "skipping unparsable message entry"),
            }
        }
        Ok(messages)
    }

    /// Subscribe to a room's change channel; each notification means the
    /// window should be re-fetched.
    pub async fn subscribe_room(&self, room: &RoomId) -> ChatResult<broadcast::Receiver<String>> {
        self.subscribe_channel(&room_channel(room)).await
    }

    /// Subscribe to the presence change channel.
    pub async fn subscribe_presence(&self) -> ChatResult<broadcast::Receiver<String>> {
        self.subscribe_channel(PRESENCE_CHANNEL).await
    }

    /// One pub/sub connection per subscription, forwarding notifications to
    /// a broadcast channel.
    async fn subscribe_channel(&self, channel: &str) -> ChatResult<broadcast::Receiver<String>> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        info!(channel = %channel, "subscribed to store channel");

        let (tx, rx) = broadcast::channel(64);
        let mut stream = pubsub.into_on_message();

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                if let Ok(payload) = msg.get_payload::<String>() {
                    let _ = tx.send(payload);
                }
            }
        });

        Ok(rx)
    }

    // --- Presence: one TTL'd record per client, removed by the store once
    // the owning session stops refreshing it ---

    /// Write (or refresh) a presence record and notify subscribers.
    pub async fn presence_put(&self, entry: &PresenceEntry, ttl: Duration) -> ChatResult<()> {
        let mut conn = self.connection().await?;
        let key = presence_key(&entry.client_id);
        let payload = serde_json::to_string(entry)?;
        conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs())
            .await?;
        conn.publish::<_, _, ()>(PRESENCE_CHANNEL, "changed").await?;
        Ok(())
    }

    /// Proactively delete a presence record and notify subscribers.
    pub async fn presence_remove(&self, client: &ClientId) -> ChatResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(presence_key(client)).await?;
        conn.publish::<_, _, ()>(PRESENCE_CHANNEL, "changed").await?;
        info!(client = %client, "presence record removed");
        Ok(())
    }

    /// Current complete presence set. Records that fail to parse are skipped.
    pub async fn presence_all(&self) -> ChatResult<Vec<PresenceEntry>> {
        let mut conn = self.connection().await?;
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(format!("{}*", PRESENCE_KEY_PREFIX))
                .await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                match serde_json::from_str::<PresenceEntry>(&raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(key = %key, error = %e, "skipping unparsable presence record"),
                }
            }
        }
        Ok(entries)
    }
}
