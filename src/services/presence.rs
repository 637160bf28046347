//! Presence tracker for the hosted-store variant.
//!
//! Each session owns one record in the presence collection. The record
//! carries a TTL that a keepalive task refreshes while the session lives, so
//! the store drops it on its own shortly after the session disconnects.
//! Explicit teardown removes the record proactively instead of waiting for
//! expiry.

use crate::error::ChatResult;
use crate::models::presence::PresenceEntry;
use crate::models::room::ClientId;
use crate::repositories::StoreRepository;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Publishes the local client's presence and observes everyone else's.
pub struct PresenceTracker {
    repo: Option<Arc<StoreRepository>>,
    ttl: Duration,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(repo: Option<Arc<StoreRepository>>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            keepalive: Mutex::new(None),
        }
    }

    /// Write the local presence record and start refreshing its TTL.
    /// Re-announcing (e.g. after a display name change) replaces the
    /// previous keepalive.
    pub async fn announce(&self, entry: PresenceEntry) -> ChatResult<()> {
        let repo = match &self.repo {
            Some(repo) => Arc::clone(repo),
            None => return Ok(()),
        };

        repo.presence_put(&entry, self.ttl).await?;
        info!(client = %entry.client_id, name = %entry.display_name, "presence announced");

        let ttl = self.ttl;
        let refresh = tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl / 2);
            tick.tick().await; // immediate first tick, record already written
            loop {
                tick.tick().await;
                let mut refreshed = entry.clone();
                refreshed.last_seen = chrono::Utc::now();
                if let Err(e) = repo.presence_put(&refreshed, ttl).await {
                    warn!(error = %e, "presence refresh failed");
                }
            }
        });

        let mut slot = self.keepalive.lock().await;
        if let Some(old) = slot.replace(refresh) {
            old.abort();
        }
        Ok(())
    }

    /// Proactively remove the local record and stop the keepalive.
    pub async fn clear(&self, client: &ClientId) -> ChatResult<()> {
        if let Some(old) = self.keepalive.lock().await.take() {
            old.abort();
        }
        if let Some(repo) = &self.repo {
            repo.presence_remove(client).await?;
        }
        Ok(())
    }

    /// Live feed of the complete presence set: one snapshot on every change
    /// notification, plus a periodic re-poll so TTL expiry of silent peers
    /// is observed.
    pub async fn subscribe(&self) -> ChatResult<RosterSubscription> {
        let repo = match &self.repo {
            Some(repo) => Arc::clone(repo),
            None => {
                // Degraded: an empty feed that never fires.
                let (_tx, rx) = mpsc::unbounded_channel();
                return Ok(RosterSubscription::new(rx, Vec::new()));
            }
        };

        let mut notify = match repo.subscribe_presence().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "presence feed unavailable");
                let (_tx, rx) = mpsc::unbounded_channel();
                return Ok(RosterSubscription::new(rx, Vec::new()));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            let mut repoll = tokio::time::interval(ttl);
            loop {
                tokio::select! {
                    changed = notify.recv() => {
                        if let Err(tokio::sync::broadcast::error::RecvError::Closed) = changed {
                            break;
                        }
                    }
                    _ = repoll.tick() => {}
                }
                match repo.presence_all().await {
                    Ok(entries) => {
                        if tx.send(entries).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "presence fetch failed"),
                }
            }
        });

        Ok(RosterSubscription::new(rx, vec![task]))
    }
}

/// Live feed of complete presence snapshots. Close semantics mirror
/// [`crate::services::channel::ChannelSubscription`].
#[derive(Debug)]
pub struct RosterSubscription {
    events: mpsc::UnboundedReceiver<Vec<PresenceEntry>>,
    tasks: Vec<JoinHandle<()>>,
    closed: AtomicBool,
}

impl RosterSubscription {
    fn new(events: mpsc::UnboundedReceiver<Vec<PresenceEntry>>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            events,
            tasks,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn next_roster(&mut self) -> Option<Vec<PresenceEntry>> {
        self.events.recv().await
    }

    /// Idempotent cancellation.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for RosterSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_tracker_is_inert() {
        let tracker = PresenceTracker::new(None, Duration::from_secs(30));
        let entry = PresenceEntry::new(ClientId::from("c1"), "Alice");
        tracker.announce(entry).await.unwrap();
        tracker.clear(&ClientId::from("c1")).await.unwrap();

        let mut feed = tracker.subscribe().await.unwrap();
        // Feed ends immediately instead of firing.
        assert!(feed.next_roster().await.is_none());
    }
}
