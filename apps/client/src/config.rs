//! Client configuration, stored as TOML.

use std::path::Path;

use chunkstream_protocol::{DEFAULT_BLOCK_SIZE, DEFAULT_SERVER_ADDR};
use serde::{Deserialize, Serialize};

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "chunkstream-client.toml";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Upload server address (`host:port`).
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Chunk payload size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_server_addr() -> String {
    DEFAULT_SERVER_ADDR.into()
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            block_size: default_block_size(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or defaults if it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}
