//! Persistent pseudonymous identity.
//!
//! One random token per local profile, generated on first use and reused
//! across sessions. Nothing is negotiated with any service; collisions are
//! treated as negligible.

use crate::error::{ChatError, ChatResult};
use crate::models::room::ClientId;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

const TOKEN_LEN: usize = 16;

/// Identity data persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityFile {
    client_id: ClientId,
    created_at: DateTime<Utc>,
}

/// Load the persisted identity, or generate and persist a new one.
///
/// Subsequent calls against the same path return the same value unchanged.
pub fn load_or_create(path: &Path) -> ChatResult<ClientId> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        let file: IdentityFile = serde_json::from_str(&contents)?;
        if file.client_id.as_str().is_empty() {
            return Err(ChatError::Identity("empty client id in state file".to_string()));
        }
        return Ok(file.client_id);
    }

    let client_id = generate();
    let file = IdentityFile {
        client_id: client_id.clone(),
        created_at: Utc::now(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(client_id)
}

/// Generate a fresh random token.
fn generate() -> ClientId {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    ClientId::new(token)
}
