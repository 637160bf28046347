//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Which message backend the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Hosted keyed store (messages + presence collections).
    Store,
    /// Peer-to-peer mesh via a public directory.
    Mesh,
}

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Selected backend: `store` or `mesh`.
    pub backend: Backend,
    /// Hosted store URL (e.g. `redis://127.0.0.1/`). Absent = degraded, local-echo-only.
    pub store_url: Option<String>,
    /// Peer directory base URL (e.g. `http://directory.example:9000`). Absent = mesh unavailable.
    pub directory_url: Option<String>,
    /// Local bind address for incoming peer links (mesh). Port 0 picks a free port.
    pub mesh_listen: SocketAddr,
    /// Directory containing local state (identity file).
    pub state_dir: PathBuf,
    /// Name of the shared default room.
    pub lobby: String,
    /// Bounded message window per room.
    pub history_limit: usize,
    /// How often the mesh re-enters discovery to pick up new peers.
    pub scan_interval: Duration,
    /// Presence record lifetime; refreshed while the session lives.
    pub presence_ttl: Duration,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let backend = match std::env::var("NATTER_BACKEND")
            .unwrap_or_else(|_| "store".to_string())
            .as_str()
        {
            "store" => Backend::Store,
            "mesh" => Backend::Mesh,
            other => return Err(ConfigLoadError::UnknownBackend(other.to_string())),
        };

        let store_url = std::env::var("NATTER_STORE_URL").ok();
        let directory_url = std::env::var("NATTER_DIRECTORY_URL").ok();

        let mesh_listen = std::env::var("NATTER_MESH_LISTEN")
            .unwrap_or_else(|_| "0.0.0.0:0".to_string());
        let mesh_listen: SocketAddr = mesh_listen
            .parse()
            .map_err(|_| ConfigLoadError::InvalidMeshListen)?;

        let state_dir = std::env::var("NATTER_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".natter"));
        let lobby = std::env::var("NATTER_LOBBY").unwrap_or_else(|_| "lobby".to_string());

        let history_limit = parse_or("NATTER_HISTORY_LIMIT", 150)?;
        let scan_interval = Duration::from_secs(parse_or("NATTER_SCAN_INTERVAL_SECS", 5)?);
        let presence_ttl = Duration::from_secs(parse_or("NATTER_PRESENCE_TTL_SECS", 30)?);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            backend,
            store_url,
            directory_url,
            mesh_listen,
            state_dir,
            lobby,
            history_limit,
            scan_interval,
            presence_ttl,
            log_level,
        })
    }

    /// Path of the persisted identity file inside the state directory.
    pub fn identity_path(&self) -> PathBuf {
        self.state_dir.join("identity.json")
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(var.to_string())),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid NATTER_MESH_LISTEN")]
    InvalidMeshListen,
    #[error("Unknown NATTER_BACKEND: {0}")]
    UnknownBackend(String),
    #[error("Invalid number in {0}")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // One sequential test: the scenarios share process-wide env vars.
    #[test]
    fn from_env_defaults_then_rejects_bad_values() {
        std::env::remove_var("NATTER_BACKEND");
        std::env::remove_var("NATTER_HISTORY_LIMIT");

        let config = Config::from_env().unwrap();
        assert_eq!(config.backend, Backend::Store);
        assert_eq!(config.lobby, "lobby");
        assert_eq!(config.history_limit, 150);
        assert!(config.identity_path().ends_with("identity.json"));

        std::env::set_var("NATTER_BACKEND", "carrier-pigeon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigLoadError::UnknownBackend(_))
        ));
        std::env::remove_var("NATTER_BACKEND");

        std::env::set_var("NATTER_HISTORY_LIMIT", "many");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigLoadError::InvalidNumber(_))
        ));
        std::env::remove_var("NATTER_HISTORY_LIMIT");
    }
}
