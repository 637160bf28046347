//! Peer-mesh message channel.
//!
//! Discovery is pull-only: a scan interval re-enters `Discovering`, queries
//! the directory, and dials every room peer not already connected. Messages
//! fan out over every open link with no acknowledgment and no order of
//! record; concurrent senders may be displayed in different orders on
//! different peers. That causal (not total) ordering is the accepted
//! consistency model of this variant.
//!
//! All link-registry mutation happens in one driver task per room
//! subscription; the listener, scan timer, dial tasks, and link readers talk
//! to it over channels only.

pub mod connection;
pub mod directory;

use crate::error::ChatResult;
use crate::models::message::{ChatMessage, MessageDraft, PeerPayload, PresenceNote};
use crate::models::room::{ClientId, RoomId};
use crate::services::channel::{ChannelEvent, ChannelSubscription, MessageChannel};
use async_trait::async_trait;
use connection::{spawn_link, LinkEvent, PeerLink};
use directory::{in_room, mint_peer_id, peers_in_room, Directory, PeerAnnouncement};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-room discovery state. `Ready` persists, re-entering `Discovering`
/// on every scan tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeshState {
    Init,
    Discovering,
    Ready,
}

type DriverSlot = Arc<Mutex<Option<mpsc::UnboundedSender<MeshCmd>>>>;

enum MeshCmd {
    Publish(PeerPayload),
    SetPresence(PresenceNote),
    Inbound {
        peer_id: String,
        note: PresenceNote,
        ws: Box<WebSocketStream<TcpStream>>,
    },
    Dialed {
        announcement: PeerAnnouncement,
        ws: Box<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    },
    DialFailed {
        peer_id: String,
    },
}

/// Message channel that talks to room peers directly.
pub struct MeshChannel {
    directory: Arc<dyn Directory>,
    identity: ClientId,
    advertise: String,
    scan_interval: Duration,
    driver: DriverSlot,
    listener: JoinHandle<()>,
}

impl MeshChannel {
    /// Bind the local link listener and start accepting inbound peers.
    /// Incoming links are routed to whichever room subscription is current.
    pub async fn bind(
        directory: Arc<dyn Directory>,
        identity: ClientId,
        listen: SocketAddr,
        scan_interval: Duration,
    ) -> ChatResult<Self> {
        let listener = TcpListener::bind(listen).await?;
        let advertise = listener.local_addr()?.to_string();
        info!(addr = %advertise, "mesh listener bound");

        let slot: DriverSlot = Arc::new(Mutex::new(None));
        let accept_slot = Arc::clone(&slot);
        let listener = tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let slot = Arc::clone(&accept_slot);
                tokio::spawn(async move {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => inbound_handshake(ws, slot, remote).await,
                        Err(e) => debug!(remote = %remote, error = %e, "ws accept failed"),
                    }
                });
            }
        });

        Ok(Self {
            directory,
            identity,
            advertise,
            scan_interval,
            driver: slot,
            listener,
        })
    }

    pub fn identity(&self) -> &ClientId {
        &self.identity
    }

    /// Address peers dial to reach this client.
    pub fn advertise_addr(&self) -> &str {
        &self.advertise
    }

    fn current_driver(&self) -> Option<mpsc::UnboundedSender<MeshCmd>> {
        self.driver.lock().expect("driver slot poisoned").clone()
    }
}

impl Drop for MeshChannel {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// The remote side opens with a presence announcement; anything else (or a
/// stale room) drops the socket.
async fn inbound_handshake(
    mut ws: WebSocketStream<TcpStream>,
    slot: DriverSlot,
    remote: SocketAddr,
) {
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.next()).await;
    let text = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            debug!(remote = %remote, "inbound link closed before announcing");
            return;
        }
    };
    let (peer_id, note) = match serde_json::from_str::<PeerPayload>(&text) {
        Ok(PeerPayload::Presence { peer_id, note }) => (peer_id, note),
        _ => {
            debug!(remote = %remote, "inbound link sent no presence announcement");
            return;
        }
    };

    let driver = slot.lock().expect("driver slot poisoned").clone();
    match driver {
        Some(tx) => {
            let _ = tx.send(MeshCmd::Inbound {
                peer_id,
                note,
                ws: Box::new(ws),
            });
        }
        None => debug!(remote = %remote, "no active room, dropping inbound link"),
    }
}

#[async_trait]
impl MessageChannel for MeshChannel {
    async fn subscribe(&self, room: &RoomId) -> ChatResult<ChannelSubscription> {
        let peer_id = mint_peer_id(room);
        let announcement = PeerAnnouncement {
            peer_id: peer_id.clone(),
            addr: self.advertise.clone(),
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.driver.lock().expect("driver slot poisoned") = Some(cmd_tx.clone());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            directory: Arc::clone(&self.directory),
            room: room.clone(),
            peer_id,
            announcement,
            own_note: PresenceNote {
                client_id: self.identity.clone(),
                display_name: "anon".to_string(),
            },
            links: HashMap::new(),
            pending: HashSet::new(),
            state: MeshState::Init,
            events: events_tx,
        };
        let scan_interval = self.scan_interval;
        let task = tokio::spawn(driver.run(cmd_rx, cmd_tx, scan_interval));

        Ok(ChannelSubscription::new(events_rx, vec![task]))
    }

    async fn publish(&self, room: &RoomId, draft: MessageDraft) -> ChatResult<ChatMessage> {
        let message = draft.stamp();
        match self.current_driver() {
            Some(tx) => {
                let _ = tx.send(MeshCmd::Publish(PeerPayload::Chat(message.clone())));
            }
            None => debug!(room = %room, "no active room, message kept local"),
        }
        Ok(message)
    }

    async fn publish_presence(&self, room: &RoomId, note: PresenceNote) -> ChatResult<()> {
        match self.current_driver() {
            Some(tx) => {
                let _ = tx.send(MeshCmd::SetPresence(note));
            }
            None => debug!(room = %room, "no active room, presence kept local"),
        }
        Ok(())
    }

    fn echoes_locally(&self) -> bool {
        // No round-trip delivers our own messages back.
        true
    }
}

/// Owns the link registry for one room subscription.
struct Driver {
    directory: Arc<dyn Directory>,
    room: RoomId,
    peer_id: String,
    announcement: PeerAnnouncement,
    own_note: PresenceNote,
    links: HashMap<String, PeerLink>,
    pending: HashSet<String>,
    state: MeshState,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<MeshCmd>,
        cmd_tx: mpsc::UnboundedSender<MeshCmd>,
        scan_interval: Duration,
    ) {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let mut scan = tokio::time::interval(scan_interval);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd, &link_tx),
                    None => break,
                },
                Some(event) = link_rx.recv() => self.handle_link_event(event),
                _ = scan.tick() => self.scan(&cmd_tx).await,
            }
        }
    }

    fn handle_cmd(&mut self, cmd: MeshCmd, link_tx: &mpsc::UnboundedSender<LinkEvent>) {
        match cmd {
            MeshCmd::Publish(payload) => {
                for link in self.links.values() {
                    link.send(&payload);
                }
            }
            MeshCmd::SetPresence(note) => {
                self.own_note = note;
                let payload = self.own_presence();
                for link in self.links.values() {
                    link.send(&payload);
                }
            }
            MeshCmd::Dialed { announcement, ws } => {
                self.pending.remove(&announcement.peer_id);
                if self.links.contains_key(&announcement.peer_id) {
                    // Simultaneous dial both ways; the inbound side won.
                    debug!(peer = %announcement.peer_id, "dropping duplicate link");
                    return;
                }
                debug!(peer = %announcement.peer_id, "link open (dialed)");
                let link = spawn_link(announcement.peer_id.clone(), *ws, link_tx.clone());
                link.send(&self.own_presence());
                self.links.insert(announcement.peer_id, link);
            }
            MeshCmd::DialFailed { peer_id } => {
                // Retried on the next scan tick.
                self.pending.remove(&peer_id);
            }
            MeshCmd::Inbound { peer_id, note, ws } => {
                if !in_room(&peer_id, &self.room) {
                    debug!(peer = %peer_id, room = %self.room, "dropping inbound link from another room");
                    return;
                }
                if self.links.contains_key(&peer_id) {
                    debug!(peer = %peer_id, "dropping duplicate inbound link");
                    return;
                }
                debug!(peer = %peer_id, "link open (inbound)");
                let link = spawn_link(peer_id.clone(), *ws, link_tx.clone());
                link.send(&self.own_presence());
                self.links.insert(peer_id.clone(), link);
                let _ = self.events.send(ChannelEvent::Presence { peer_id, note });
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Payload { payload, .. } => match payload {
                PeerPayload::Chat(message) => {
                    let _ = self.events.send(ChannelEvent::Message(message));
                }
                PeerPayload::Presence { peer_id, note } => {
                    let _ = self.events.send(ChannelEvent::Presence { peer_id, note });
                }
            },
            LinkEvent::Closed { peer_id } => {
                self.pending.remove(&peer_id);
                if self.links.remove(&peer_id).is_some() {
                    let _ = self.events.send(ChannelEvent::PeerClosed(peer_id));
                }
            }
        }
    }

    /// One discovery pass: refresh our registration, list the room's peers,
    /// dial everyone new. Directory failures are logged and retried on the
    /// next tick.
    async fn scan(&mut self, cmd_tx: &mpsc::UnboundedSender<MeshCmd>) {
        self.enter(MeshState::Discovering);

        if let Err(e) = self.directory.register(&self.announcement).await {
            warn!(error = %e, "directory registration failed");
        }

        match self.directory.peers().await {
            Ok(listing) => {
                for peer in peers_in_room(&listing, &self.room, &self.peer_id) {
                    if self.links.contains_key(&peer.peer_id)
                        || self.pending.contains(&peer.peer_id)
                    {
                        continue;
                    }
                    self.pending.insert(peer.peer_id.clone());
                    let peer = peer.clone();
                    let cmd_tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        let url = format!("ws://{}", peer.addr);
                        match tokio_tungstenite::connect_async(url.as_str()).await {
                            Ok((ws, _)) => {
                                let _ = cmd_tx.send(MeshCmd::Dialed {
                                    announcement: peer,
                                    ws: Box::new(ws),
                                });
                            }
                            Err(e) => {
                                debug!(peer = %peer.peer_id, error = %e, "dial failed");
                                let _ = cmd_tx.send(MeshCmd::DialFailed {
                                    peer_id: peer.peer_id,
                                });
                            }
                        }
                    });
                }
            }
            Err(e) => warn!(error = %e, "directory query failed, retrying next scan"),
        }

        self.enter(MeshState::Ready);
    }

    fn own_presence(&self) -> PeerPayload {
        PeerPayload::Presence {
            peer_id: self.peer_id.clone(),
            note: self.own_note.clone(),
        }
    }

    fn enter(&mut self, state: MeshState) {
        if self.state != state {
            debug!(room = %self.room, ?state, "mesh state");
            self.state = state;
        }
    }
}
