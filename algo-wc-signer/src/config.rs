//! Session configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ALGORAND_CHAIN_ID;
use crate::session::DEFAULT_EVENT_CAPACITY;
use crate::transport::PeerMeta;

pub const DEFAULT_BRIDGE_URL: &str = "https://bridge.walletconnect.org";

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings shared by server and client sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay the session is negotiated through
    pub bridge_url: String,
    /// Chain id offered when creating a session
    pub chain_id: u64,
    /// Metadata advertised to the peer
    pub metadata: Option<PeerMeta>,
    /// Buffer size of the notification channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            chain_id: ALGORAND_CHAIN_ID,
            metadata: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }
}
