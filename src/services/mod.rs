//! Business logic: the channel seam, both backends' services, presence,
//! and the session controller.

pub mod channel;
pub mod hosted;
pub mod presence;
pub mod session;

pub use channel::{ChannelEvent, ChannelSubscription, MessageChannel};
pub use hosted::HostedChannel;
pub use presence::{PresenceTracker, RosterSubscription};
pub use session::{SessionEvent, SessionHandle};
