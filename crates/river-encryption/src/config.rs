use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PICKLE_KEY: &str = "DEFAULT_KEY";
pub const DEFAULT_DEVICE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_FORCE_DOWNLOAD_THRESHOLD: usize = 10;
pub const DEFAULT_DEVICE_LOOKBACK: usize = 10;
pub const DEFAULT_MAX_PENDING_PER_SESSION: usize = 1000;
pub const DEFAULT_MAX_PENDING_SESSIONS: usize = 1000;

/// Tunables for the encryption core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// Secret the at-rest pickle key is derived from.
    #[serde(default = "default_pickle_key")]
    pub pickle_key: String,

    /// How long cached device lists stay valid.
    #[serde(default = "default_device_ttl_secs")]
    pub device_ttl_secs: u64,

    /// Streams with at most this many members always re-download device lists.
    #[serde(default = "default_force_download_threshold")]
    pub force_download_threshold: usize,

    /// Newest devices kept per user.
    #[serde(default = "default_device_lookback")]
    pub device_lookback: usize,

    #[serde(default = "default_max_pending_per_session")]
    pub max_pending_per_session: usize,

    /// Sessions with queued messages; the oldest is evicted past this.
    #[serde(default = "default_max_pending_sessions")]
    pub max_pending_sessions: usize,
}

fn default_pickle_key() -> String {
    DEFAULT_PICKLE_KEY.to_string()
}

fn default_device_ttl_secs() -> u64 {
    DEFAULT_DEVICE_TTL_SECS
}

fn default_force_download_threshold() -> usize {
    DEFAULT_FORCE_DOWNLOAD_THRESHOLD
}

fn default_device_lookback() -> usize {
    DEFAULT_DEVICE_LOOKBACK
}

fn default_max_pending_per_session() -> usize {
    DEFAULT_MAX_PENDING_PER_SESSION
}

fn default_max_pending_sessions() -> usize {
    DEFAULT_MAX_PENDING_SESSIONS
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            pickle_key: default_pickle_key(),
            device_ttl_secs: default_device_ttl_secs(),
            force_download_threshold: default_force_download_threshold(),
            device_lookback: default_device_lookback(),
            max_pending_per_session: default_max_pending_per_session(),
            max_pending_sessions: default_max_pending_sessions(),
        }
    }
}

impl EncryptionConfig {
    /// Load config from a JSON file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))
    }

    pub fn device_ttl_millis(&self) -> u64 {
        self.device_ttl_secs.saturating_mul(1000)
    }
}
