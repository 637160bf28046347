//! One point-to-point peer link over a WebSocket.
//!
//! Lifecycle per link: `Connecting -> Open -> Closed`. A link handle exists
//! once the socket is open; dialing peers sit in the channel driver's
//! pending set until then. Sends to a link that is not open are dropped
//! silently; close is idempotent.

use crate::models::message::PeerPayload;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Events a link reports to the channel driver.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Payload { peer_id: String, payload: PeerPayload },
    Closed { peer_id: String },
}

enum LinkCmd {
    Send(String),
    Shutdown,
}

/// Handle to one open peer link.
pub struct PeerLink {
    peer_id: String,
    out: mpsc::UnboundedSender<LinkCmd>,
    closed: Arc<AtomicBool>,
}

impl PeerLink {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> LinkState {
        if self.closed.load(Ordering::SeqCst) {
            LinkState::Closed
        } else {
            LinkState::Open
        }
    }

    /// Transmit a payload. Dropped silently unless the link is open.
    pub fn send(&self, payload: &PeerPayload) {
        if self.state() != LinkState::Open {
            trace!(peer = %self.peer_id, "dropping send to non-open link");
            return;
        }
        match serde_json::to_string(payload) {
            Ok(raw) => {
                if self.out.send(LinkCmd::Send(raw)).is_err() {
                    trace!(peer = %self.peer_id, "dropping send, link writer gone");
                }
            }
            Err(e) => warn!(peer = %self.peer_id, error = %e, "payload serialization failed"),
        }
    }

    /// Close the link. Safe to call more than once; only the first call has
    /// any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.out.send(LinkCmd::Shutdown);
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Spawn reader and writer tasks for an established socket and return the
/// link handle. The link reports payloads and its eventual close to
/// `events`; `Closed` is reported exactly once.
pub(crate) fn spawn_link<S>(
    peer_id: String,
    ws: WebSocketStream<S>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> PeerLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            match cmd {
                LinkCmd::Send(raw) => {
                    if sink.send(Message::Text(raw)).await.is_err() {
                        break;
                    }
                }
                LinkCmd::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_peer = peer_id.clone();
    let reader_out = out_tx.clone();
    let reader_closed = Arc::clone(&closed);
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match serde_json::from_str::<PeerPayload>(&text) {
                Ok(payload) => {
                    if events
                        .send(LinkEvent::Payload {
                            peer_id: reader_peer.clone(),
                            payload,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = %reader_peer, error = %e, "ignoring malformed frame");
                }
            }
        }
        reader_closed.store(true, Ordering::SeqCst);
        let _ = reader_out.send(LinkCmd::Shutdown);
        let _ = events.send(LinkEvent::Closed {
            peer_id: reader_peer,
        });
    });

    PeerLink {
        peer_id,
        out: out_tx,
        closed,
    }
}
