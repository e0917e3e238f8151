//! Configuration system for ggnet.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GGNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ggnet/config.toml
//!   3. ~/.config/ggnet/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_MAX_CONTROL_LEN, DEFAULT_MAX_DECODE_FAILURES, HANDSHAKE_TIMEOUT_SECS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GgnetConfig {
    pub network: NetworkConfig,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// host:port to listen on. Bound verbatim.
    pub listen_addr: String,
    /// Peers dialed at startup. Empty entries are skipped.
    pub bootstrap_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest control payload a decoder accepts.
    pub max_control_len: u32,
    /// Consecutive malformed frames before a connection is dropped.
    pub max_decode_failures: u32,
    /// Handshake run on every new connection.
    pub handshake: HandshakeMode,
    /// Only used by the version handshake.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store root. Everything the node persists lives under here.
    pub root: PathBuf,
    /// How keys map to paths under the root.
    pub path_scheme: PathScheme,
}

/// Which handshake a transport runs before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeMode {
    /// Accept every connection.
    #[default]
    Nop,
    /// Exchange and validate a protocol version preamble.
    Version,
}

/// Key → path mapping used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathScheme {
    /// SHA-1 digest sharded into 5-hex-char directories.
    #[default]
    Cas,
    /// BLAKE3 digest sharded into 5-hex-char directories.
    Blake3,
    /// Key used verbatim as directory and filename.
    Identity,
}

impl std::str::FromStr for HandshakeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nop" => Ok(HandshakeMode::Nop),
            "version" => Ok(HandshakeMode::Version),
            other => Err(ConfigError::UnknownValue("transport.handshake", other.to_string())),
        }
    }
}

impl std::str::FromStr for PathScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cas" => Ok(PathScheme::Cas),
            "blake3" => Ok(PathScheme::Blake3),
            "identity" => Ok(PathScheme::Identity),
            other => Err(ConfigError::UnknownValue("storage.path_scheme", other.to_string())),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            bootstrap_nodes: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_control_len: DEFAULT_MAX_CONTROL_LEN,
            max_decode_failures: DEFAULT_MAX_DECODE_FAILURES,
            handshake: HandshakeMode::default(),
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("ggnetwork"),
            path_scheme: PathScheme::default(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ggnet")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ggnet")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("unknown value for {0}: {1:?}")]
    UnknownValue(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GgnetConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            GgnetConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without consulting the environment.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GGNET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GgnetConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply GGNET_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GGNET_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = var("GGNET_NETWORK__BOOTSTRAP_NODES") {
            self.network.bootstrap_nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("GGNET_STORAGE__ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(Ok(scheme)) = var("GGNET_STORAGE__PATH_SCHEME").map(|v| v.parse()) {
            self.storage.path_scheme = scheme;
        }
        if let Some(Ok(mode)) = var("GGNET_TRANSPORT__HANDSHAKE").map(|v| v.parse()) {
            self.transport.handshake = mode;
        }
    }
}
