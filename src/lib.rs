//! Anonymous realtime chat client core.
//!
//! Two interchangeable message backends behind one session: a hosted keyed
//! store (messages + presence collections, pub/sub change notification) and
//! a peer-to-peer mesh (directory discovery + direct WebSocket links).
//! Display names are free text; the only stable identity is a random token
//! persisted per local profile.

pub mod config;
pub mod error;
pub mod identity;
pub mod mesh;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::{Backend, Config};
pub use error::{ChatError, ChatResult};
pub use models::{
    ChatMessage, ClientId, MessageDraft, PresenceEntry, PresenceNote, RoomId, Timeline,
};
pub use services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
pub use services::hosted::HostedChannel;
pub use services::presence::PresenceTracker;
pub use services::session::{SessionEvent, SessionHandle};
