//! Server configuration.
//!
//! Stored as TOML. Every field is optional; a missing file means all
//! defaults. Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};

use chunkstream_protocol::DEFAULT_LISTEN_ADDR;
use chunkstream_transfer::{CleanupPolicy, ReceiverConfig};
use serde::{Deserialize, Serialize};

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "chunkstream-server.toml";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Address the upload server listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Root directory for per-session chunk artifacts.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Where the reassembled file is written.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default)]
    pub cleanup: CleanupPolicy,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.into()
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("data").join("temp_chunks")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("data").join("uploaded_file")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            scratch_dir: default_scratch_dir(),
            output_path: default_output_path(),
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            scratch_dir: self.scratch_dir.clone(),
            output_path: self.output_path.clone(),
            cleanup: self.cleanup,
        }
    }
}
