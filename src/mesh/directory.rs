//! Peer directory: the public registry used for discovery.
//!
//! Peer identifiers embed the room as a prefix (`<room>__<suffix>`), so a
//! directory listing can be filtered to a room with no extra lookup. The
//! directory also hands out the dialable address for each peer; connection
//! setup itself is out-of-band of this crate.

use crate::error::ChatResult;
use crate::models::room::RoomId;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Separator between the room prefix and the random suffix of a peer id.
pub const PEER_SEPARATOR: &str = "__";

const SUFFIX_LEN: usize = 8;

/// Mint a fresh peer id for a room.
pub fn mint_peer_id(room: &RoomId) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}{}", room, PEER_SEPARATOR, suffix)
}

/// Room prefix of a peer id, if well-formed.
pub fn room_of(peer_id: &str) -> Option<&str> {
    peer_id.rsplit_once(PEER_SEPARATOR).map(|(room, _)| room)
}

/// Whether a peer id belongs to the given room.
pub fn in_room(peer_id: &str, room: &RoomId) -> bool {
    room_of(peer_id) == Some(room.as_str())
}

/// One registered peer: id plus the address it accepts links on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    pub peer_id: String,
    pub addr: String,
}

/// Filter a directory listing to the peers of `room`, excluding the local
/// peer itself.
pub fn peers_in_room<'a>(
    listing: &'a [PeerAnnouncement],
    room: &RoomId,
    local_peer_id: &str,
) -> Vec<&'a PeerAnnouncement> {
    listing
        .iter()
        .filter(|p| p.peer_id != local_peer_id && in_room(&p.peer_id, room))
        .collect()
}

/// The discovery service seam.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Register (or refresh) the local peer's announcement.
    async fn register(&self, announcement: &PeerAnnouncement) -> ChatResult<()>;

    /// All currently-registered peers, rooms mixed together.
    async fn peers(&self) -> ChatResult<Vec<PeerAnnouncement>>;
}

/// Directory client against a public HTTP endpoint.
pub struct HttpDirectory {
    http: reqwest::Client,
    base: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base_url.into(),
        }
    }

    fn peers_url(&self) -> String {
        format!("{}/peers", self.base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(&self, announcement: &PeerAnnouncement) -> ChatResult<()> {
        self.http
            .post(self.peers_url())
            .json(announcement)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn peers(&self) -> ChatResult<Vec<PeerAnnouncement>> {
        let listing = self
            .http
            .get(self.peers_url())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PeerAnnouncement>>()
            .await?;
        Ok(listing)
    }
}
