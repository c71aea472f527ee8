//! TOML-based configuration for the gateway.
//!
//! Every field has a default, so the gateway runs without a config file and
//! an older file missing newer keys still loads.  A complete file:
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! bind_address = "0.0.0.0"
//! port = 5055
//! idle_timeout_secs = 300      # 0 disables the idle timeout
//! max_frame_len = 4096         # reassembly bound for enveloped frames
//!
//! [decoder]
//! require_envelope = false     # reject frames without a length/CRC envelope
//!
//! [storage]
//! backend = "jsonl"            # "jsonl" | "memory"
//! directory = "data"
//! namespace = "remote_address" # "remote_address" | "imei"
//! queue_capacity = 1024        # record batches a session may queue for storage
//! ```
//!
//! Command-line flags override individual values after the file is loaded
//! (see `main.rs`).

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use avl_core::{DecodeOptions, NamespaceStrategy};
use serde::Deserialize;
use thiserror::Error;

use crate::application::supervisor::SessionSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `server.bind_address` is not an IP address.
    #[error("invalid bind address '{value}': {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Device-facing socket settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds without data before a connection is closed.  `0` disables.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Largest standard-envelope frame the reader will reassemble.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DecoderConfig {
    /// Reject telemetry that lacks a verifiable length/CRC envelope.
    #[serde(default)]
    pub require_envelope: bool,
}

/// Where decoded records go.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the JSON-lines backend.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// How the per-connection storage key is derived.
    #[serde(default)]
    pub namespace: NamespaceStrategy,
    /// Batches a session may queue while storage catches up; further
    /// batches are dropped and logged.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Jsonl,
    Memory,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5055
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_max_frame_len() -> usize {
    crate::application::supervisor::DEFAULT_MAX_FRAME_LEN
}
fn default_directory() -> PathBuf {
    PathBuf::from("data")
}
fn default_queue_capacity() -> usize {
    crate::application::forward_records::DEFAULT_QUEUE_CAPACITY
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            decoder: DecoderConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            directory: default_directory(),
            namespace: NamespaceStrategy::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl ServerConfig {
    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `bind_address` is not an IP.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr =
            self.bind_address
                .parse()
                .map_err(|source| ConfigError::InvalidAddress {
                    value: self.bind_address.clone(),
                    source,
                })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// `None` when the idle timeout is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl GatewayConfig {
    /// Per-connection settings handed to every supervisor.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.server.idle_timeout(),
            max_frame_len: self.server.max_frame_len,
            decode: DecodeOptions {
                require_envelope: self.decoder.require_envelope,
            },
            namespace: self.storage.namespace,
            queue_capacity: self.storage.queue_capacity,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the configuration at `path`, returning `GatewayConfig::default()`
/// if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: GatewayConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GatewayConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
