//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`SCRIBE__*`, `__` separates sections, e.g. `SCRIBE__HEARTBEAT__INTERVAL_MS`)

use anyhow::{Context, Result};
use scribe_core::HubConfig;
use scribe_transport::{PumpConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "scribe.toml",
    "/etc/scribe/scribe.toml",
    "~/.config/scribe/scribe.toml",
];

const ENV_PREFIX: &str = "SCRIBE";
const ENV_SEPARATOR: &str = "__";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Hub queue sizes.
    #[serde(default)]
    pub hub: HubSection,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Document access policy.
    #[serde(default)]
    pub access: AccessConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix of the document routes; the websocket lives at `{prefix}/:id/ws`.
    #[serde(default = "default_path_prefix")]
    pub websocket_path_prefix: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Hub command channel capacity.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Read deadline in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the service that issues tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Whether documents without an allowlist are open to every authenticated user.
    #[serde(default = "default_true")]
    pub default_allow: bool,

    /// Per-document allowlists.
    ///
    /// Document ids are values rather than table keys so they keep their case
    /// through every loader.
    #[serde(default)]
    pub documents: Vec<DocumentAllowlist>,
}

/// Users allowed to view one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAllowlist {
    pub document: String,
    #[serde(default)]
    pub users: Vec<String>,
}

impl DocumentAllowlist {
    #[must_use]
    pub fn new(document: impl Into<String>, users: &[&str]) -> Self {
        Self {
            document: document.into(),
            users: users.iter().map(|u| (*u).to_string()).collect(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_path_prefix() -> String {
    "/documents".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_command_capacity() -> usize {
    scribe_core::hub::DEFAULT_COMMAND_CAPACITY
}

fn default_outbound_capacity() -> usize {
    scribe_core::DEFAULT_OUTBOUND_CAPACITY
}

fn default_heartbeat_interval() -> u64 {
    54_000 // 54 seconds, 9/10 of the read deadline
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubSection::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path_prefix: default_path_prefix(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_allow: true,
            documents: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::from_sources(
            file.as_deref(),
            ::config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR),
        )
    }

    fn from_sources(file: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(env.try_parsing(true))
            .build()
            .with_context(|| match file {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration from environment".to_string(),
            })?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Route of the websocket endpoint.
    #[must_use]
    pub fn websocket_route(&self) -> String {
        format!("{}/:id/ws", self.path_prefix())
    }

    /// Route of the active users endpoint.
    #[must_use]
    pub fn active_users_route(&self) -> String {
        format!("{}/:id/active-users", self.path_prefix())
    }

    fn path_prefix(&self) -> &str {
        self.transport.websocket_path_prefix.trim_end_matches('/')
    }

    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.hub.command_capacity,
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            pump: PumpConfig {
                ping_interval: Duration::from_millis(self.heartbeat.interval_ms),
                pong_wait: Duration::from_millis(self.heartbeat.timeout_ms),
                write_wait: Duration::from_millis(self.heartbeat.write_timeout_ms),
            },
            outbound_capacity: self.hub.outbound_capacity,
        }
    }
}
