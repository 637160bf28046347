//! Entry point: load config, wire the selected backend, and run a
//! line-oriented terminal front end around the session.

use natter::config::{Backend, Config};
use natter::mesh::directory::HttpDirectory;
use natter::mesh::MeshChannel;
use natter::repositories::StoreRepository;
use natter::services::session::{self, SessionConfig};
use natter::{HostedChannel, MessageChannel, PresenceTracker, SessionEvent};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let identity = natter::identity::load_or_create(&config.identity_path())?;
    tracing::info!(client = %identity, "identity loaded");

    let (channel, tracker): (Arc<dyn MessageChannel>, Option<Arc<PresenceTracker>>) =
        match config.backend {
            Backend::Store => {
                let repo = match &config.store_url {
                    Some(url) => Some(Arc::new(StoreRepository::new(url)?)),
                    None => {
                        tracing::warn!("NATTER_STORE_URL not set; running in offline mode");
                        None
                    }
                };
                let channel: Arc<dyn MessageChannel> = match &repo {
                    Some(repo) => {
                        Arc::new(HostedChannel::new(Arc::clone(repo), config.history_limit))
                    }
                    None => Arc::new(HostedChannel::inert(config.history_limit)),
                };
                let tracker = Arc::new(PresenceTracker::new(repo, config.presence_ttl));
                (channel, Some(tracker))
            }
            Backend::Mesh => {
                let directory_url = config
                    .directory_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("NATTER_DIRECTORY_URL required for mesh"))?;
                let directory = Arc::new(HttpDirectory::new(directory_url));
                let channel = MeshChannel::bind(
                    directory,
                    identity.clone(),
                    config.mesh_listen,
                    config.scan_interval,
                )
                .await?;
                (Arc::new(channel), None)
            }
        };

    let handle = session::spawn(
        SessionConfig {
            identity,
            lobby: config.lobby.clone(),
            history_limit: config.history_limit,
        },
        channel,
        tracker,
    );

    println!("natter - you are {}", handle.identity());
    println!("commands: /name <display>  /dm <client id>  /lobby  /who  /quit");

    let mut events = handle.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut roster: Vec<natter::PresenceEntry> = Vec::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Timeline(messages)) => {
                    if let Some(m) = messages.last() {
                        println!("[{}] {}: {}", m.sent_at.format("%H:%M:%S"), m.author, m.body);
                    }
                }
                Ok(SessionEvent::Roster(entries)) => {
                    roster = entries;
                }
                Ok(SessionEvent::System(notice)) => println!("* {}", notice),
                Ok(SessionEvent::RoomChanged(room)) => println!("* now in {}", room),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(name) = line.strip_prefix("/name ") {
                    handle.set_name(name.trim());
                } else if let Some(target) = line.strip_prefix("/dm ") {
                    handle.open_direct(natter::ClientId::from(target.trim()));
                } else if line == "/lobby" {
                    handle.lobby();
                } else if line == "/who" {
                    if roster.is_empty() {
                        println!("* nobody else around");
                    } else {
                        for entry in &roster {
                            println!("* online: {} ({})", entry.display_name, entry.client_id);
                        }
                    }
                } else if line == "/quit" {
                    handle.shutdown();
                    break;
                } else if line.starts_with('/') {
                    println!("* unknown command: {}", line);
                } else {
                    handle.send(line);
                }
            }
        }
    }

    Ok(())
}
