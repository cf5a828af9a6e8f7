//! [`RemoteExecutor`] backed by a native SSH client.
//!
//! `connect` opens one TCP connection, performs the handshake and
//! authenticates with either the configured private key or the password.
//! Every command then runs on its own session channel over that connection,
//! and its stdout and stderr are collected together in arrival order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::ssh_key::{PrivateKey, PublicKey};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use tracing::debug;

use super::{CommandError, ConnectError, ExecutorFactory, RemoteExecutor};
use crate::config::{Credential, HostTarget, SshConfig};

/// Client handler that trusts every host key.
pub struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn load_key(path: &Path) -> Result<Arc<PrivateKey>, ConnectError> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| ConnectError::Key {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

enum Login {
    Key(Arc<PrivateKey>),
    Password(String),
}

/// Executor holding one authenticated SSH connection.
pub struct SshExecutor {
    target: HostTarget,
    settings: SshConfig,
    client_config: Arc<client::Config>,
    session: Option<Handle<AcceptAnyHostKey>>,
    closed: bool,
}

impl SshExecutor {
    pub fn new(
        target: HostTarget,
        settings: SshConfig,
        client_config: Arc<client::Config>,
    ) -> Self {
        Self {
            target,
            settings,
            client_config,
            session: None,
            closed: false,
        }
    }

    /// Handshake and authentication, without the overall deadline.
    async fn open(&self) -> Result<Handle<AcceptAnyHostKey>, ConnectError> {
        // a bad key file fails before any network traffic
        let login = match &self.target.credential {
            Credential::PrivateKey(path) => Login::Key(load_key(path)?),
            Credential::Password(password) => Login::Password(password.clone()),
        };

        let refused = |e: russh::Error| ConnectError::Refused {
            host: self.target.address.clone(),
            message: e.to_string(),
        };

        let mut session = client::connect(
            Arc::clone(&self.client_config),
            (self.target.address.as_str(), self.target.port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(refused)?;

        let user = self.target.user.clone();
        let auth = match login {
            Login::Key(key) => {
                // RSA keys sign with the strongest hash the server accepts
                let hash = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(refused)?
                    .flatten();
                session
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash))
                    .await
            }
            Login::Password(password) => session.authenticate_password(user, password).await,
        }
        .map_err(refused)?;

        if !auth.success() {
            return Err(ConnectError::AuthRejected {
                host: self.target.address.clone(),
                user: self.target.user.clone(),
            });
        }
        Ok(session)
    }

    /// Run `command` on a fresh channel and collect everything it prints.
    async fn run(
        session: &Handle<AcceptAnyHostKey>,
        command: &str,
    ) -> Result<String, CommandError> {
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        let mut output = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                _ => {}
            }
        }

        let text = String::from_utf8_lossy(&output).into_owned();
        match status {
            Some(0) => Ok(text),
            // killed by a signal or closed without a status
            other => Err(CommandError::Failed {
                status: other.and_then(|code| i32::try_from(code).ok()),
                output: text,
            }),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::Closed);
        }

        debug!(host = %self.target.address, port = self.target.port, "Opening ssh session");
        let session = tokio::time::timeout(self.settings.connect_timeout(), self.open())
            .await
            .map_err(|_| ConnectError::Timeout {
                host: self.target.address.clone(),
                secs: self.settings.connect_timeout_secs,
            })??;

        self.session = Some(session);
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> Result<String, CommandError> {
        let Some(session) = self.session.as_ref() else {
            return Err(CommandError::NotConnected);
        };

        match self.settings.command_timeout() {
            Some(limit) => tokio::time::timeout(limit, Self::run(session, command))
                .await
                .map_err(|_| CommandError::Timeout(limit.as_secs()))?,
            None => Self::run(session, command).await,
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(session) = self.session.take() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                debug!(host = %self.target.address, error = %e, "ssh disconnect failed");
            }
        }
        debug!(host = %self.target.address, "ssh session closed");
    }
}

/// Creates an [`SshExecutor`] per host with shared settings.
#[derive(Clone)]
pub struct SshExecutorFactory {
    settings: SshConfig,
    client_config: Arc<client::Config>,
}

impl SshExecutorFactory {
    pub fn new(settings: SshConfig) -> Self {
        Self {
            settings,
            client_config: Arc::new(client::Config::default()),
        }
    }
}

impl std::fmt::Debug for SshExecutorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutorFactory")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExecutorFactory for SshExecutorFactory {
    type Executor = SshExecutor;

    fn executor(&self, host: &HostTarget) -> SshExecutor {
        SshExecutor::new(
            host.clone(),
            self.settings.clone(),
            Arc::clone(&self.client_config),
        )
    }
}
