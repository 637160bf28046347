//! Data models for rooms, messages, presence, and the ordered timeline.

pub mod message;
pub mod presence;
pub mod room;
pub mod timeline;

pub use message::*;
pub use presence::*;
pub use room::*;
pub use timeline::*;
