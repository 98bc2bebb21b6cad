//! Panel configuration, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use indi_panel_indi::{ConnectionConfig, QueueConfig, TreeConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT};
use indi_panel_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub indi: IndiConfig,

    #[serde(default)]
    pub hub: HubConfig,
}

/// INDI server connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndiConfig {
    /// Server host (default: localhost)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 7624)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Delay before reconnecting after a lost connection, in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Element depth of messages in the stream
    #[serde(default)]
    pub message_level: usize,

    /// Maximum size of one XML message (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Longest a throttled update may be held back, in milliseconds
    #[serde(default = "default_expiration")]
    pub default_expiration_ms: u64,

    /// Number vectors whose Busy updates are throttled
    #[serde(default = "default_delayable_vectors")]
    pub delayable_vectors: Vec<String>,

    /// Message log entries kept
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

/// Store and commit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Store path of the device tree
    #[serde(default = "default_tree_path")]
    pub tree_path: Vec<String>,

    /// Store path of the message log
    #[serde(default = "default_messages_path")]
    pub messages_path: Vec<String>,

    /// Synchronizer passes per commit before giving up
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_expiration() -> u64 {
    500
}

fn default_delayable_vectors() -> Vec<String> {
    vec!["CCD_EXPOSURE".to_string()]
}

fn default_max_messages() -> usize {
    100
}

fn default_tree_path() -> Vec<String> {
    vec!["deviceTree".to_string()]
}

fn default_messages_path() -> Vec<String> {
    vec!["messages".to_string()]
}

fn default_max_passes() -> usize {
    16
}

impl Default for IndiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reconnect_delay_ms: default_reconnect_delay(),
            message_level: 0,
            max_message_size: default_max_message_size(),
            default_expiration_ms: default_expiration(),
            delayable_vectors: default_delayable_vectors(),
            max_messages: default_max_messages(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tree_path: default_tree_path(),
            messages_path: default_messages_path(),
            max_passes: default_max_passes(),
        }
    }
}

impl PanelConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.indi.port == 0 {
            return Err(PanelError::Config("indi.port cannot be 0".into()));
        }
        if self.indi.max_message_size == 0 {
            return Err(PanelError::Config("indi.max_message_size cannot be 0".into()));
        }
        if self.hub.tree_path.is_empty() || self.hub.messages_path.is_empty() {
            return Err(PanelError::Config("store paths cannot be empty".into()));
        }
        if self.hub.tree_path == self.hub.messages_path {
            return Err(PanelError::Config(
                "device tree and message log need distinct paths".into(),
            ));
        }
        if self.hub.max_passes == 0 {
            return Err(PanelError::Config("hub.max_passes cannot be 0".into()));
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_passes: self.hub.max_passes,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(self.indi.reconnect_delay_ms),
            message_level: self.indi.message_level,
            max_message_size: self.indi.max_message_size,
            queue: QueueConfig {
                default_expiration: Duration::from_millis(self.indi.default_expiration_ms),
                delayable_vectors: self.indi.delayable_vectors.clone(),
            },
            tree: TreeConfig {
                tree_path: self.hub.tree_path.clone(),
                messages_path: self.hub.messages_path.clone(),
                max_messages: self.indi.max_messages,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_components() {
        let config = PanelConfig::default();
        assert!(config.validate().is_ok());

        let conn = config.connection_config();
        let defaults = ConnectionConfig::default();
        assert_eq!(conn.reconnect_delay, defaults.reconnect_delay);
        assert_eq!(conn.queue.default_expiration, defaults.queue.default_expiration);
        assert_eq!(conn.queue.delayable_vectors, defaults.queue.delayable_vectors);
        assert_eq!(conn.tree.tree_path, defaults.tree.tree_path);
        assert_eq!(config.sync_config().max_passes, SyncConfig::default().max_passes);
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"indi": {{"host": "observatory.local", "default_expiration_ms": 250}}}}"#).unwrap();

        let config = PanelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.indi.host, "observatory.local");
        assert_eq!(config.indi.port, 7624);
        assert_eq!(
            config.connection_config().queue.default_expiration,
            Duration::from_millis(250)
        );
        assert_eq!(config.hub, HubConfig::default());
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hub": {{"max_passes": 0}}}}"#).unwrap();
        assert!(matches!(PanelConfig::from_file(file.path()), Err(PanelError::Config(_))));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{not json").unwrap();
        assert!(matches!(PanelConfig::from_file(broken.path()), Err(PanelError::Parse(_))));

        let missing = Path::new("/nonexistent/indi-panel.json");
        assert!(matches!(PanelConfig::from_file(missing), Err(PanelError::Io(_))));
    }
}
