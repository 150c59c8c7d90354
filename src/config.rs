//! Gateway Configuration
//!
//! Top-level configuration loaded from YAML. Every section has defaults, so
//! an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ratelimit::RateLimitConfig;
use crate::search::{ExecutorConfig, HttpBackendConfig};

/// Default bound on graceful shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default bind address of the metrics/health server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Durations written as whole seconds
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Which search backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Keyword search over a JSON document list
    InMemory {
        /// JSON array of documents; empty corpus when absent
        #[serde(default)]
        corpus: Option<PathBuf>,
        /// Artificial per-call latency in milliseconds
        #[serde(default)]
        latency_ms: u64,
    },
    /// Remote JSON search service
    Http(HttpBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::InMemory {
            corpus: None,
            latency_ms: 0,
        }
    }
}

/// Login throttle thresholds per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub ip: RateLimitConfig,
    pub username: RateLimitConfig,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            ip: RateLimitConfig::for_ip(),
            username: RateLimitConfig::for_username(),
        }
    }
}

/// Metrics and health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve `/metrics`, `/healthz` and `/readyz`
    pub enabled: bool,
    /// Bind address
    pub metrics_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub executor: ExecutorConfig,
    pub backend: BackendConfig,
    pub login: LoginConfig,
    pub server: ServerConfig,

    /// Bound on graceful shutdown
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            backend: BackendConfig::default(),
            login: LoginConfig::default(),
            server: ServerConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&raw)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.executor.cache_ttl.is_zero() {
            // Zero would mean "never expires" in the cache.
            return Err(Error::Config("executor.cache_ttl must be non-zero".to_string()));
        }
        if self.executor.sweep_interval.is_zero() {
            return Err(Error::Config(
                "executor.sweep_interval must be non-zero".to_string(),
            ));
        }
        if let BackendConfig::Http(http) = &self.backend {
            if http.base_url.trim().is_empty() {
                return Err(Error::Config("backend.base_url must be set".to_string()));
            }
            if http.timeout.is_zero() {
                return Err(Error::Config("backend.timeout must be non-zero".to_string()));
            }
        }
        self.login.ip.validate()?;
        self.login.username.validate()?;
        if self.server.enabled && self.server.metrics_addr.trim().is_empty() {
            return Err(Error::Config("server.metrics_addr must be set".to_string()));
        }
        Ok(())
    }
}
