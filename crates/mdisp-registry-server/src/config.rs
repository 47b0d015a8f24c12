// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registry server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Registry server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Rendezvous socket of the master process.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Where suspended state is written before a re-exec.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// How many times to retry connecting to the rendezvous socket.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/mdisp/socket")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/run/mdisp/registry.state")
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay() -> u64 {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            socket_path: default_socket_path(),
            state_path: default_state_path(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/run/mdisp/socket"));
        assert_eq!(config.reconnect_attempts, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"socket_path": "/tmp/mdisp.sock"}}"#).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/mdisp.sock"));
        assert_eq!(config.reconnect_delay_ms, 200);
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ServerConfig::from_file(file.path()).is_err());
    }
}
