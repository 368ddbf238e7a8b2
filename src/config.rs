//! Server and client settings, optionally loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::{CHUNK_SIZE, DEFAULT_PORT, MAX_TOKEN_VALUE};

const DEFAULT_IO_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| Error::filesystem(path, e))?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| Error::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.server.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub root: PathBuf,
    pub chunk_size: usize,
    /// Per-operation socket deadline; `0` disables it.
    pub io_timeout_secs: u64,
    /// `None` spawns a session for every accepted connection.
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("server_files"),
            chunk_size: CHUNK_SIZE,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            max_connections: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.io_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_TOKEN_VALUE as usize {
            return Err(Error::Config {
                message: format!(
                    "chunk_size must be between 1 and {}, got {}",
                    MAX_TOKEN_VALUE, self.chunk_size
                ),
            });
        }
        if self.max_connections == Some(0) {
            return Err(Error::Config {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub save_dir: PathBuf,
    /// Per-operation socket deadline; `0` disables it.
    pub io_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            save_dir: PathBuf::from("client_files"),
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.io_timeout_secs)
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr(), "0.0.0.0:5001");
        assert_eq!(config.client.addr(), "127.0.0.1:5001");
        assert_eq!(config.server.chunk_size, 1024 * 1024);
        assert_eq!(config.server.io_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.server.max_connections, None);
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{ "server": { "port": 6000, "io_timeout_secs": 0 }, "client": { "save_dir": "downloads" } }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.io_timeout(), None);
        assert_eq!(config.server.root, PathBuf::from("server_files"));
        assert_eq!(config.client.save_dir, PathBuf::from("downloads"));
        assert_eq!(config.client.port, 5001);
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{ "server": { "chunk_size": 0 } }"#).unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }
}
