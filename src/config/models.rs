// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("invalid backend address {address:?}: {reason}")]
    InvalidBackend { address: String, reason: String },

    #[error("backend {0} is configured more than once")]
    DuplicateBackend(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health check path {0:?} must start with '/'")]
    InvalidHealthPath(String),
}

/// Scheme used to reach backends, for both probes and forwarded traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendScheme {
    #[default]
    Http,
    Https,
}

impl BackendScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendScheme::Http => "http",
            BackendScheme::Https => "https",
        }
    }
}

impl fmt::Display for BackendScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the balancer listens on.
    pub port: u16,
    /// Upper bound, in seconds, for a health probe and for connecting to a backend.
    pub timeout_secs: u64,
    pub scheme: BackendScheme,
    /// Adds an `lb-from` header naming the backend to every proxied response.
    pub trace: bool,
    /// Backend addresses as `host:port`, in selection order.
    pub backends: Vec<String>,
    pub health_check: HealthCheckConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            timeout_secs: 3,
            scheme: BackendScheme::Http,
            trace: false,
            backends: vec![
                "server1:8080".to_string(),
                "server2:8080".to_string(),
                "server3:8080".to_string(),
            ],
            health_check: HealthCheckConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("timeout_secs"));
        }
        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("health_check.interval_secs"));
        }
        if !self.health_check.path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(self.health_check.path.clone()));
        }

        let mut seen = HashSet::new();
        for address in &self.backends {
            backend_url(self.scheme, address)?;
            if !seen.insert(address.as_str()) {
                return Err(ConfigError::DuplicateBackend(address.clone()));
            }
        }

        Ok(())
    }
}

/// Builds the base URL of a backend, requiring an explicit `host:port` address.
pub fn backend_url(scheme: BackendScheme, address: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBackend {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    if address.contains('/') {
        return Err(invalid("expected host:port without scheme or path"));
    }

    let url = Url::parse(&format!("{}://{}/", scheme, address))
        .map_err(|e| invalid(&e.to_string()))?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    // `Url::port` hides the scheme's default port, so check the raw text too.
    if url.port().is_none() && !has_explicit_port(address) {
        return Err(invalid("missing port"));
    }

    Ok(url)
}

fn has_explicit_port(address: &str) -> bool {
    address
        .rsplit_once(':')
        .map_or(false, |(_, port)| !port.is_empty() && port.parse::<u16>().is_ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            path: "/health".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9091,
            path: "/metrics".to_string(),
        }
    }
}
