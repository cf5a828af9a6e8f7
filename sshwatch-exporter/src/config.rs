//! Configuration for the SSH exporter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sshwatch_collector::{HostConfig, HostTarget, SshConfig};
use sshwatch_common::LoggingConfig;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] sshwatch_common::Error),
    #[error(transparent)]
    Collector(#[from] sshwatch_collector::ConfigError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub exporter: EndpointConfig,

    /// SSH transport and scheduling settings.
    #[serde(default)]
    pub ssh: SshConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hosts to monitor.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address to listen on (default: "0.0.0.0:9109").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// HTTP basic auth for the index and metrics pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_auth: Option<HttpAuth>,
}

fn default_listen() -> String {
    "0.0.0.0:9109".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            http_auth: None,
        }
    }
}

impl EndpointConfig {
    /// Credentials to enforce, if both are set.
    pub fn auth(&self) -> Option<HttpAuth> {
        self.http_auth
            .as_ref()
            .filter(|auth| auth.is_enabled())
            .cloned()
    }
}

/// Basic auth credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl HttpAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Auth is only enforced when both fields are non-empty.
    pub fn is_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = sshwatch_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = sshwatch_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .exporter
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.exporter.listen
            )));
        }

        if !self.exporter.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.exporter.path == "/" || self.exporter.path == "/health" {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.exporter.path
            )));
        }

        self.ssh.validate()?;
        self.targets()?;

        Ok(())
    }

    /// Resolve the configured hosts.
    pub fn targets(&self) -> Result<Vec<HostTarget>, ConfigError> {
        self.hosts
            .iter()
            .cloned()
            .map(|host| HostTarget::try_from(host).map_err(ConfigError::from))
            .collect()
    }
}
