//! The per-client session: one event-handling task owning the timeline,
//! the roster, and the live room subscription.
//!
//! Every state transition happens on delivery of exactly one event (a
//! command from the front end, a channel event, a roster snapshot), so no
//! locking is needed anywhere in here. Room switches close the old
//! subscription unconditionally before the new one is opened.

use crate::error::ChatResult;
use crate::models::message::{MessageDraft, PresenceNote};
use crate::models::presence::PresenceEntry;
use crate::models::room::{ClientId, RoomId};
use crate::models::timeline::Timeline;
use crate::models::ChatMessage;
use crate::services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
use crate::services::presence::{PresenceTracker, RosterSubscription};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const DEFAULT_NAME: &str = "anon";

/// Events the front end renders.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Full ordered message list after any change.
    Timeline(Vec<ChatMessage>),
    /// Complete current online set.
    Roster(Vec<PresenceEntry>),
    /// Lifecycle notice: peer left, send failed, degraded store.
    System(String),
    /// The session moved to another room.
    RoomChanged(RoomId),
}

enum Command {
    SetName(String),
    Send(String),
    OpenDirect(ClientId),
    Lobby,
    Shutdown,
}

/// Handle used by the front end; cheap to clone the event feed from.
pub struct SessionHandle {
    identity: ClientId,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn identity(&self) -> &ClientId {
        &self.identity
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let _ = self.commands.send(Command::SetName(name.into()));
    }

    pub fn send(&self, body: impl Into<String>) {
        let _ = self.commands.send(Command::Send(body.into()));
    }

    pub fn open_direct(&self, target: ClientId) {
        let _ = self.commands.send(Command::OpenDirect(target));
    }

    pub fn lobby(&self) {
        let _ = self.commands.send(Command::Lobby);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Everything a session needs at spawn time.
pub struct SessionConfig {
    pub identity: ClientId,
    pub lobby: String,
    pub history_limit: usize,
}

/// Spawn the session task and return its handle.
pub fn spawn(
    config: SessionConfig,
    channel: Arc<dyn MessageChannel>,
    tracker: Option<Arc<PresenceTracker>>,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, _) = broadcast::channel(64);

    let session = Session {
        identity: config.identity.clone(),
        lobby: config.lobby,
        display_name: DEFAULT_NAME.to_string(),
        room: RoomId::lobby("uninitialized"),
        timeline: Timeline::new(config.history_limit),
        mesh_roster: HashMap::new(),
        degraded: false,
        channel,
        tracker,
        sub: None,
        roster_sub: None,
        events: events_tx.clone(),
    };
    tokio::spawn(session.run(commands_rx));

    SessionHandle {
        identity: config.identity,
        commands: commands_tx,
        events: events_tx,
    }
}

struct Session {
    identity: ClientId,
    lobby: String,
    display_name: String,
    room: RoomId,
    timeline: Timeline,
    /// Mesh-only: peers known from in-band announcements, keyed by peer id.
    mesh_roster: HashMap<String, PresenceEntry>,
    degraded: bool,
    channel: Arc<dyn MessageChannel>,
    tracker: Option<Arc<PresenceTracker>>,
    sub: Option<ChannelSubscription>,
    roster_sub: Option<RosterSubscription>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let lobby = RoomId::lobby(&self.lobby);
        self.join_room(lobby).await;

        if let Some(tracker) = self.tracker.clone() {
            self.report(tracker.announce(self.presence_entry()).await, "presence announce");
            match tracker.subscribe().await {
                Ok(feed) => self.roster_sub = Some(feed),
                Err(e) => warn!(error = %e, "roster feed unavailable"),
            }
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = next_channel_event(&mut self.sub) => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        debug!(room = %self.room, "channel feed ended");
                        self.sub = None;
                    }
                },
                roster = next_roster(&mut self.roster_sub) => match roster {
                    Some(entries) => self.emit(SessionEvent::Roster(entries)),
                    None => self.roster_sub = None,
                },
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetName(name) => {
                self.display_name = name;
                if let Some(tracker) = self.tracker.clone() {
                    // Clear first so watchers never see two records for us.
                    self.report(tracker.clear(&self.identity).await, "presence clear");
                    self.report(tracker.announce(self.presence_entry()).await, "presence announce");
                }
                let note = self.presence_note();
                let room = self.room.clone();
                self.report(
                    self.channel.publish_presence(&room, note).await,
                    "presence publish",
                );
            }
            Command::Send(body) => {
                let draft = MessageDraft::new(
                    self.display_name.clone(),
                    self.identity.clone(),
                    body,
                );
                let room = self.room.clone();
                match self.channel.publish(&room, draft).await {
                    Ok(message) => {
                        if self.channel.echoes_locally() || self.degraded {
                            self.timeline.append(message);
                            self.emit_timeline();
                        }
                    }
                    Err(e) => {
                        warn!(room = %self.room, error = %e, "publish failed");
                        self.emit(SessionEvent::System(format!("send failed: {}", e)));
                    }
                }
            }
            Command::OpenDirect(target) => {
                let room = RoomId::direct(&self.identity, &target);
                self.join_room(room).await;
            }
            Command::Lobby => {
                let room = RoomId::lobby(&self.lobby);
                self.join_room(room).await;
            }
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Close the previous room's subscription unconditionally, then open the
    /// new one. No duplicate callbacks, no cross-room leakage.
    async fn join_room(&mut self, room: RoomId) {
        if let Some(old) = self.sub.take() {
            old.close();
        }
        self.timeline.clear();
        self.mesh_roster.clear();
        self.room = room.clone();

        match self.channel.subscribe(&room).await {
            Ok(sub) => self.sub = Some(sub),
            Err(e) => {
                warn!(room = %room, error = %e, "subscribe failed");
                self.emit(SessionEvent::System(format!("cannot join {}: {}", room, e)));
            }
        }

        info!(room = %room, "joined room");
        self.emit(SessionEvent::RoomChanged(room.clone()));
        self.emit_timeline();

        let note = self.presence_note();
        self.report(
            self.channel.publish_presence(&room, note).await,
            "presence publish",
        );
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Snapshot(messages) => {
                self.timeline.apply_snapshot(messages);
                self.emit_timeline();
            }
            ChannelEvent::Message(message) => {
                self.timeline.append(message);
                self.emit_timeline();
            }
            ChannelEvent::Presence { peer_id, note } => {
                let entry = PresenceEntry::new(note.client_id, note.display_name);
                self.mesh_roster.insert(peer_id, entry);
                self.emit_mesh_roster();
            }
            ChannelEvent::PeerClosed(peer_id) => {
                let name = self
                    .mesh_roster
                    .remove(&peer_id)
                    .map(|entry| entry.display_name)
                    .unwrap_or_else(|| peer_id.clone());
                self.emit(SessionEvent::System(format!("{} left", name)));
                self.emit_mesh_roster();
            }
            ChannelEvent::Degraded(reason) => {
                self.degraded = true;
                warn!(reason = %reason, "channel degraded");
                self.emit(SessionEvent::System(format!("offline mode: {}", reason)));
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(tracker) = self.tracker.clone() {
            self.report(tracker.clear(&self.identity).await, "presence clear");
        }
        if let Some(sub) = self.sub.take() {
            sub.close();
        }
        if let Some(feed) = self.roster_sub.take() {
            feed.close();
        }
        info!(client = %self.identity, "session closed");
    }

    fn presence_entry(&self) -> PresenceEntry {
        PresenceEntry::new(self.identity.clone(), self.display_name.clone())
    }

    fn presence_note(&self) -> PresenceNote {
        PresenceNote {
            client_id: self.identity.clone(),
            display_name: self.display_name.clone(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_timeline(&self) {
        self.emit(SessionEvent::Timeline(self.timeline.messages().to_vec()));
    }

    fn emit_mesh_roster(&self) {
        let mut entries: Vec<PresenceEntry> = self.mesh_roster.values().cloned().collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        self.emit(SessionEvent::Roster(entries));
    }

    /// Log-and-report: non-fatal failures become system messages.
    fn report(&self, result: ChatResult<()>, what: &str) {
        if let Err(e) = result {
            warn!(error = %e, "{} failed", what);
            self.emit(SessionEvent::System(format!("{} failed: {}", what, e)));
        }
    }
}

async fn next_channel_event(sub: &mut Option<ChannelSubscription>) -> Option<ChannelEvent> {
    match sub {
        Some(sub) => sub.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_roster(feed: &mut Option<RosterSubscription>) -> Option<Vec<PresenceEntry>> {
    match feed {
        Some(feed) => feed.next_roster().await,
        None => std::future::pending().await,
    }
}
