//! Client identifiers and room naming.

use serde::{Deserialize, Serialize};

/// Separator between the two participants of a direct room.
const DIRECT_SEPARATOR: char = ':';

/// Namespace prefix for direct rooms, so they can never collide with a lobby name.
const DIRECT_PREFIX: &str = "dm";

/// Opaque pseudonymous identifier for one client profile.
///
/// Generated once, persisted locally, reused across sessions. There is no
/// uniqueness negotiation; collisions are treated as negligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a chat room: either the shared lobby or a two-party direct room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// The shared default room every client joins absent a DM selection.
    pub fn lobby(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Deterministic symmetric room for a pair of clients.
    ///
    /// Both participants compute the identical id without negotiation:
    /// the pair is sorted lexicographically before joining.
    pub fn direct(a: &ClientId, b: &ClientId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!(
            "{}{sep}{}{sep}{}",
            DIRECT_PREFIX,
            lo,
            hi,
            sep = DIRECT_SEPARATOR
        ))
    }

    /// Lobby when no DM target is selected, symmetric direct room otherwise.
    pub fn resolve(lobby: &str, local: &ClientId, dm_target: Option<&ClientId>) -> Self {
        match dm_target {
            Some(target) => Self::direct(local, target),
            None => Self::lobby(lobby),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
