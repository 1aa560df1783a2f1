//! WolfSingleton Configuration
//!
//! This module provides configuration structures for a WolfSingleton node.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::election::{
    ElectionPolicy, Preference, PreferredElectionPolicy, SimpleElectionPolicy,
};
use crate::singleton::QueryConfig;

/// Main WolfSingleton configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfSingletonConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Singleton service configuration
    #[serde(default)]
    pub singleton: SingletonConfig,

    /// Value query retry configuration
    #[serde(default)]
    pub query: QuerySettings,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name
    pub name: String,

    /// Address to bind for cluster communication
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Address advertised to other nodes (defaults to bind_address)
    pub advertise_address: Option<String>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// List of peer node addresses
    #[serde(default)]
    pub peers: Vec<String>,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence in milliseconds after which a member is dropped from the view
    #[serde(default = "default_drop_timeout_ms")]
    pub drop_timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Command round-trip timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Singleton service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingletonConfig {
    /// Logical service name shared by every provider
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Providers required before a primary is elected
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Election policy
    #[serde(default)]
    pub election: ElectionConfig,
}

/// Election policy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Candidate at a fixed position
    #[default]
    Simple,
    /// First preferred node present, else `position`
    Preferred,
}

/// Election policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    /// Candidate position for the simple policy (negative counts from the end)
    #[serde(default)]
    pub position: i32,

    /// Node names or addresses, most preferred first
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl ElectionConfig {
    /// Build the configured policy
    pub fn build(&self) -> Arc<dyn ElectionPolicy> {
        let simple = SimpleElectionPolicy::new(self.position);
        match self.policy {
            PolicyKind::Simple => Arc::new(simple),
            PolicyKind::Preferred => Arc::new(PreferredElectionPolicy::new(
                self.preferences.iter().map(|p| Preference::from(p.as_str())).collect(),
                Arc::new(simple),
            )),
        }
    }
}

/// Value query retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Longest retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Total time a value read may take in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
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
fn default_bind_address() -> String {
    "0.0.0.0:7654".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_drop_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_service_name() -> String {
    "stamp".to_string()
}

fn default_quorum() -> usize {
    1
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    500
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            drop_timeout_ms: default_drop_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SingletonConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            quorum: default_quorum(),
            election: ElectionConfig::default(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
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

impl WolfSingletonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfSingletonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.singleton.name.is_empty() {
            return Err(crate::Error::Config("singleton.name cannot be empty".into()));
        }

        if self.singleton.quorum == 0 {
            return Err(crate::Error::Config("singleton.quorum must be at least 1".into()));
        }

        if self.singleton.election.policy == PolicyKind::Preferred
            && self.singleton.election.preferences.is_empty()
        {
            return Err(crate::Error::Config(
                "singleton.election.preferences cannot be empty for the preferred policy".into(),
            ));
        }

        if self.cluster.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config("cluster.heartbeat_interval_ms must be positive".into()));
        }

        if self.cluster.drop_timeout_ms <= self.heartbeat_timeout().as_millis() as u64 {
            return Err(crate::Error::Config(
                "cluster.drop_timeout_ms must exceed three heartbeat intervals".into(),
            ));
        }

        if self.query.timeout_ms == 0 {
            return Err(crate::Error::Config("query.timeout_ms must be positive".into()));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_interval_ms)
    }

    /// Silence after which a member is suspected
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * 3
    }

    /// Get drop timeout as Duration
    pub fn drop_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.drop_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    /// Value query retry settings
    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            initial_backoff: Duration::from_millis(self.query.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.query.max_backoff_ms),
            timeout: Duration::from_millis(self.query.timeout_ms),
        }
    }
}
