//! Host and monitor configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Host '{0}' has neither a password nor a private key")]
    MissingCredential(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Default SSH port, used when a host leaves `port` unset or zero.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One host entry as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Address (hostname or IP).
    pub host: String,

    /// SSH port (default: 22).
    #[serde(default)]
    pub port: u16,

    /// Login user.
    pub user: String,

    /// Password authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to an unencrypted private key. Takes precedence over `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    /// Checks to run on this host.
    #[serde(default)]
    pub monitors: MonitorSet,
}

/// How to authenticate against a host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// A validated host to collect from.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTarget {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub monitors: MonitorSet,
}

impl HostTarget {
    /// Create a target, applying the default port when `port` is zero.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        credential: Credential,
        monitors: MonitorSet,
    ) -> Self {
        Self {
            address: address.into(),
            port: if port == 0 { DEFAULT_SSH_PORT } else { port },
            user: user.into(),
            credential,
            monitors,
        }
    }
}

impl TryFrom<HostConfig> for HostTarget {
    type Error = ConfigError;

    fn try_from(config: HostConfig) -> Result<Self, Self::Error> {
        if config.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".to_string()));
        }
        if config.user.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Host '{}' has an empty user",
                config.host
            )));
        }

        let credential = match (config.private_key, config.password) {
            (Some(key), _) if !key.as_os_str().is_empty() => Credential::PrivateKey(key),
            (_, Some(password)) if !password.is_empty() => Credential::Password(password),
            _ => return Err(ConfigError::MissingCredential(config.host)),
        };

        Ok(Self::new(
            config.host,
            config.port,
            config.user,
            credential,
            config.monitors,
        ))
    }
}

/// Checks enabled for a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSet {
    /// Process command line pattern counts.
    #[serde(default)]
    pub processes: Vec<ProcessWatch>,

    /// Directory listings.
    #[serde(default)]
    pub files: Vec<FileWatch>,

    /// CPU, memory and disk statistics.
    #[serde(default)]
    pub stat: bool,
}

/// Count processes whose command line contains each pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessWatch {
    /// `find -path` glob selecting the cmdline files (default: "/proc/[0-9]*/cmdline").
    #[serde(default = "default_cmdline_glob")]
    pub path_pattern: String,

    /// Substrings to count.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_cmdline_glob() -> String {
    "/proc/[0-9]*/cmdline".to_string()
}

impl Default for ProcessWatch {
    fn default() -> Self {
        Self {
            path_pattern: default_cmdline_glob(),
            patterns: Vec::new(),
        }
    }
}

/// Report size and freshness of the files in a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWatch {
    /// Directory to list.
    pub path: String,

    /// Filename labelling rules. Evaluated and logged, not exported.
    #[serde(default)]
    pub labels: Vec<FileLabelRule>,
}

/// Attach `name=value` to files whose name matches `pattern` (a regex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLabelRule {
    pub pattern: String,
    pub name: String,
    pub value: String,
}

impl FileWatch {
    /// Compile the labelling rules of this watch.
    pub fn labeler(&self) -> FileLabeler {
        FileLabeler::new(&self.labels)
    }
}

/// Compiled filename labelling rules.
///
/// Invalid patterns are logged once and never match.
#[derive(Debug, Clone)]
pub struct FileLabeler {
    rules: Vec<(Option<Regex>, String, String)>,
}

impl FileLabeler {
    pub fn new(rules: &[FileLabelRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = match Regex::new(&rule.pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern = %rule.pattern, error = %e, "Invalid file label pattern");
                        None
                    }
                };
                (regex, rule.name.clone(), rule.value.clone())
            })
            .collect();
        Self { rules }
    }

    /// Labels of every rule matching `filename`, in rule order.
    pub fn labels_for(&self, filename: &str) -> Vec<(&str, &str)> {
        self.rules
            .iter()
            .filter(|(re, _, _)| re.as_ref().is_some_and(|re| re.is_match(filename)))
            .map(|(_, name, value)| (name.as_str(), value.as_str()))
            .collect()
    }
}

/// Transport and scheduling settings shared by every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a single remote command, in seconds (default: none).
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Maximum hosts collected at once (default: 0, unbounded).
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: None,
            max_concurrency: 0,
        }
    }
}

impl SshConfig {
    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "command_timeout_secs must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}
