//! LeaseKeeper Configuration
//!
//! This module provides configuration structures for the LeaseKeeper
//! leader-election process and its coordination server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::election::ElectionConfig;
use crate::lock::LeaseKey;

/// Main LeaseKeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseKeeperConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Lock record identity
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Election timing configuration
    #[serde(default)]
    pub election: ElectionTimingConfig,

    /// Lock store the contender talks to
    #[serde(default)]
    pub store: StoreConfig,

    /// Coordination server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Holder identity written into the lock record
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Exit the process once leadership is lost
    #[serde(default = "default_true")]
    pub exit_on_lost_leadership: bool,
}

/// Lock record identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease lock name
    #[serde(default)]
    pub name: String,

    /// Lease lock namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Election timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionTimingConfig {
    /// How long a lease is valid without renewal, in milliseconds
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// How long the leader keeps retrying renewal before giving up, in milliseconds
    #[serde(default = "default_renew_deadline_ms")]
    pub renew_deadline_ms: u64,

    /// Interval between election attempts, in milliseconds
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,

    /// Clear the holder identity on shutdown
    #[serde(default = "default_true")]
    pub release_on_cancel: bool,

    /// Extra random fraction added to follower polling waits (0 = none)
    #[serde(default)]
    pub retry_jitter: f64,
}

/// Lock store backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote coordination server
    Http,
    /// Local SQLite database file
    Sqlite,
    /// Process-local map (single process only)
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Http => write!(f, "http"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Lock store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend holds the lock record
    #[serde(default = "default_client_backend")]
    pub backend: BackendKind,

    /// Coordination server base URL (http backend)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token sent to the coordination server
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Request timeout in milliseconds (http backend)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Database path (sqlite backend)
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Coordination server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_server_address")]
    pub bind_address: String,

    /// Backend holding the served records
    #[serde(default = "default_server_backend")]
    pub backend: BackendKind,

    /// Database path (sqlite backend)
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Bearer token required from clients (optional)
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_identity() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_lease_duration_ms() -> u64 {
    60_000
}

fn default_renew_deadline_ms() -> u64 {
    15_000
}

fn default_retry_period_ms() -> u64 {
    5_000
}

fn default_client_backend() -> BackendKind {
    BackendKind::Http
}

fn default_server_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/leasekeeper/leases.db")
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            exit_on_lost_leadership: true,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
        }
    }
}

impl Default for ElectionTimingConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: default_lease_duration_ms(),
            renew_deadline_ms: default_renew_deadline_ms(),
            retry_period_ms: default_retry_period_ms(),
            release_on_cancel: true,
            retry_jitter: 0.0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_client_backend(),
            endpoint: default_endpoint(),
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            path: default_db_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_server_address(),
            backend: default_server_backend(),
            path: default_db_path(),
            auth_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LeaseKeeperConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: LeaseKeeperConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.identity.is_empty() {
            return Err(crate::Error::Config("node.identity cannot be empty".into()));
        }

        if self.store.backend == BackendKind::Http && self.store.endpoint.is_empty() {
            return Err(crate::Error::Config("store.endpoint cannot be empty".into()));
        }

        if self.server.backend == BackendKind::Http {
            return Err(crate::Error::Config(
                "server.backend must be sqlite or memory".into(),
            ));
        }

        if !(0.0..=10.0).contains(&self.election.retry_jitter) {
            return Err(crate::Error::Config(
                "election.retry_jitter must be between 0 and 10".into(),
            ));
        }

        self.election_config().map(|_| ())
    }

    /// Validate the settings a contending replica needs on top of `validate`
    pub fn validate_lease(&self) -> crate::Result<()> {
        if self.lease.name.is_empty() {
            return Err(crate::Error::Config(
                "lease.name cannot be empty (missing lease lock name)".into(),
            ));
        }

        if self.lease.namespace.is_empty() {
            return Err(crate::Error::Config(
                "lease.namespace cannot be empty (missing lease lock namespace)".into(),
            ));
        }

        Ok(())
    }

    /// Key of the lock record this node contends for
    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey::new(self.lease.namespace.clone(), self.lease.name.clone())
    }

    /// Build the immutable election configuration
    pub fn election_config(&self) -> crate::Result<ElectionConfig> {
        ElectionConfig::builder(self.node.identity.clone())
            .lease_duration(Duration::from_millis(self.election.lease_duration_ms))
            .renew_deadline(Duration::from_millis(self.election.renew_deadline_ms))
            .retry_period(Duration::from_millis(self.election.retry_period_ms))
            .release_on_cancel(self.election.release_on_cancel)
            .retry_jitter(self.election.retry_jitter)
            .build()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }

    /// Render a sample configuration file
    pub fn sample(identity: &str, name: &str, namespace: &str) -> String {
        format!(
            r#"# LeaseKeeper Configuration

[node]
identity = "{identity}"
exit_on_lost_leadership = true

[lease]
name = "{name}"
namespace = "{namespace}"

[election]
lease_duration_ms = 60000
renew_deadline_ms = 15000
retry_period_ms = 5000
release_on_cancel = true

[store]
backend = "http"
endpoint = "http://127.0.0.1:8080"
request_timeout_ms = 10000

[server]
bind_address = "0.0.0.0:8080"
backend = "sqlite"
path = "/var/lib/leasekeeper/leases.db"

[logging]
level = "info"
format = "pretty"
"#
        )
    }
}
