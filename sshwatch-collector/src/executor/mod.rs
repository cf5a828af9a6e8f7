//! Remote command execution.
//!
//! A [`RemoteExecutor`] is bound to one host for one collection pass. The
//! sampler connects once, runs each check as a separate command over that
//! connection and closes it on every path.

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod ssh;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::HostTarget;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockExecutor, MockFactory, MockHost};
pub use ssh::{SshExecutor, SshExecutorFactory};

/// Failure to establish a session. The host is reported as down.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to load private key {}: {message}", path.display())]
    Key { path: PathBuf, message: String },

    #[error("Connection to {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    #[error("Connection to {host} failed: {message}")]
    Refused { host: String, message: String },

    #[error("Authentication as {user} on {host} was rejected")]
    AuthRejected { host: String, user: String },

    #[error("Executor is already closed")]
    Closed,
}

/// Failure of a single command. The check is skipped.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command ran but exited non-zero. Carries whatever it printed.
    #[error("Command exited with status {status:?}")]
    Failed {
        status: Option<i32>,
        output: String,
    },

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,
}

impl CommandError {
    /// Output produced before the failure, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            CommandError::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A remote shell session on one host.
#[async_trait]
pub trait RemoteExecutor: Send {
    /// Open the session.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Run `command` and return its combined stdout and stderr.
    async fn execute(&mut self, command: &str) -> Result<String, CommandError>;

    /// Release the session. Calling it twice is a no-op.
    async fn close(&mut self);
}

/// Builds one executor per host per scrape.
pub trait ExecutorFactory: Send + Sync + 'static {
    type Executor: RemoteExecutor + 'static;

    fn executor(&self, host: &HostTarget) -> Self::Executor;
}
