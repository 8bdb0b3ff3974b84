//! Configuration loading and layering
//!
//! Settings merge lowest to highest precedence: built-in defaults, then
//! `config.toml` in the data directory, then `GRIDFLOW_*` environment
//! variables. CLI flags override individual values after the merge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use gridflow_wire::ServiceKind;

// ============================================================================
// Data directory
// ============================================================================

/// Filesystem layout for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayDirs {
    pub data_dir: PathBuf,
}

impl GatewayDirs {
    /// Resolve the data directory, creating it if missing. `custom_dir`
    /// (from `--data-dir` or `GRIDFLOW_DATA_DIR`) wins over `~/.gridflow`.
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not determine home directory")?
                .join(".gridflow"),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

// ============================================================================
// File config (config.toml)
// ============================================================================

/// On-disk configuration. Every section and key is optional; missing keys
/// fall back to the `default_*` functions below. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub backends: BackendsFileConfig,
    #[serde(default)]
    pub bus: BusFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFileConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-session outbound channel capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

fn default_outbound_buffer() -> usize {
    100
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthFileConfig {
    /// When false every connection resolves to the anonymous user.
    #[serde(default)]
    pub enabled: bool,
    /// Base64url ed25519 public key trusted for access tokens.
    #[serde(default)]
    pub verify_key: String,
    #[serde(default = "default_anonymous_display_name")]
    pub anonymous_display_name: String,
}

fn default_anonymous_display_name() -> String {
    "Guest".to_string()
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_key: String::new(),
            anonymous_display_name: default_anonymous_display_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsFileConfig {
    /// Per-call deadline on backend links, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Reconnect backoff cap, in seconds.
    #[serde(default = "default_reconnect_max_backoff_secs")]
    pub reconnect_max_backoff_secs: u64,
    #[serde(default = "default_graph_target")]
    pub graph: BackendTarget,
    #[serde(default = "default_machine_target")]
    pub machine: BackendTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendTarget {
    pub url: String,
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_reconnect_max_backoff_secs() -> u64 {
    60
}

fn default_graph_target() -> BackendTarget {
    BackendTarget {
        url: "ws://127.0.0.1:8090/graphserver".to_string(),
    }
}

fn default_machine_target() -> BackendTarget {
    BackendTarget {
        url: "ws://127.0.0.1:8091/machineserver".to_string(),
    }
}

impl Default for BackendsFileConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_max_backoff_secs: default_reconnect_max_backoff_secs(),
            graph: default_graph_target(),
            machine: default_machine_target(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusFileConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Topic suffixes suppressed under the streams-events prefix.
    #[serde(default = "default_excluded_suffixes")]
    pub excluded_suffixes: Vec<String>,
    /// Broadcast channel depth.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_topic_prefix() -> String {
    "gridflow/services".to_string()
}

fn default_excluded_suffixes() -> Vec<String> {
    vec!["response".to_string(), "functions".to_string()]
}

fn default_bus_capacity() -> usize {
    256
}

impl Default for BusFileConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            excluded_suffixes: default_excluded_suffixes(),
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFileConfig {
    /// Install the stock payload-trim interceptor.
    #[serde(default = "default_trim_command_payloads")]
    pub trim_command_payloads: bool,
}

fn default_trim_command_payloads() -> bool {
    true
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            trim_command_payloads: default_trim_command_payloads(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Build the layered configuration: defaults, then `config.toml` from the
/// data directory, then `GRIDFLOW_*` environment variables with `__` as the
/// section separator (`GRIDFLOW_SERVER__PORT=9090`).
pub fn load_config(data_dir: &Path) -> Figment {
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        // GRIDFLOW_DATA_DIR picks the data directory before loading and is
        // not a config key.
        .merge(Env::prefixed("GRIDFLOW_").split("__").ignore(&["data_dir"]))
}

// ============================================================================
// Runtime views
// ============================================================================

/// Listener settings, merged and ready to use.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub outbound_buffer: usize,
}

impl ServerConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        Self {
            host: file.server.host.clone(),
            port: file.server.port,
            outbound_buffer: file.server.outbound_buffer,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub verify_key: String,
    pub anonymous_display_name: String,
}

impl AuthConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        Self {
            enabled: file.auth.enabled,
            verify_key: file.auth.verify_key.clone(),
            anonymous_display_name: file.auth.anonymous_display_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendsConfig {
    pub request_timeout: Duration,
    pub reconnect_max_backoff: Duration,
    pub graph_url: String,
    pub machine_url: String,
}

impl BackendsConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(file.backends.request_timeout_secs),
            reconnect_max_backoff: Duration::from_secs(file.backends.reconnect_max_backoff_secs),
            graph_url: file.backends.graph.url.clone(),
            machine_url: file.backends.machine.url.clone(),
        }
    }

    pub fn url_for(&self, service: ServiceKind) -> &str {
        match service {
            ServiceKind::Graph => &self.graph_url,
            ServiceKind::Machine => &self.machine_url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub topic_prefix: String,
    pub excluded_suffixes: Vec<String>,
    pub capacity: usize,
}

impl BusConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        Self {
            topic_prefix: file.bus.topic_prefix.clone(),
            excluded_suffixes: file.bus.excluded_suffixes.clone(),
            capacity: file.bus.capacity,
        }
    }
}
