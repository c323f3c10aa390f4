//! TOML-based configuration persistence for the host.
//!
//! The default file lives in the platform config directory:
//! - Windows:  `%APPDATA%\Couchpad\config.toml`
//! - Linux:    `~/.config/couchpad/config.toml`
//! - macOS:    `~/Library/Application Support/Couchpad/config.toml`
//!
//! ```toml
//! [server]
//! port = 7777
//! # bind_address = "192.168.1.42"
//! max_clients = 2
//! max_frame_payload = 65536
//! handshake_timeout_ms = 5000
//!
//! [host]
//! tick_rate_hz = 60
//! log_level = "info"
//! ```
//!
//! # Reading the file (for beginners)
//!
//! Each `[table]` in the file becomes one struct: `[server]` fills
//! [`ServerSection`] and `[host]` fills [`HostSection`].  The `toml` crate
//! parses the text and hands it to `serde`, whose `Deserialize` derive
//! matches keys to field names.  Writing works the other way round through
//! `Serialize`, which is what [`save_config`] uses.
//!
//! Values are typed.  `bind_address` is parsed straight into an
//! [`IpAddr`], so a typo like `"192.168.1"` is a [`ConfigError::Parse`] at
//! load time rather than a bind failure later.
//!
//! # Missing fields
//!
//! Every field carries `#[serde(default = "...")]` and both tables carry
//! `#[serde(default)]`.  A key that is absent takes the value of its
//! `default_*` helper, and a table that is absent takes its `Default` impl.
//! An empty file, a file that only sets `port`, or no file at all each load
//! as a complete [`HostConfig`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::listener::{ServerConfig, DEFAULT_PORT};

const MAX_TICK_RATE_HZ: u32 = 1000;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub host: HostSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed IPv4 address to bind.  Interface discovery is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<IpAddr>,
    /// Zero is replaced by 2 at startup.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// Console host settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// How often the host drains its event queue.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_clients() -> usize {
    2
}
fn default_max_frame_payload() -> usize {
    64 * 1024
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_tick_rate_hz() -> u32 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            max_clients: default_max_clients(),
            max_frame_payload: default_max_frame_payload(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            log_level: default_log_level(),
        }
    }
}

impl ServerSection {
    /// Converts the on-disk settings into listener settings.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            bind_address: self.bind_address,
            max_clients: self.max_clients,
            max_frame_payload: self.max_frame_payload,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}

impl HostSection {
    /// Interval between host ticks.  The rate is clamped to 1..=1000 Hz.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.clamp(1, MAX_TICK_RATE_HZ)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `HostConfig` from `path`, returning `HostConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Couchpad"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("couchpad"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Couchpad")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
