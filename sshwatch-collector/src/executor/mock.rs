//! Scripted in-memory executor for exercising the sampler and the fleet
//! collector without real hosts.
//!
//! A [`MockHost`] maps exact command strings to canned responses. When a
//! command has several responses queued they are returned in order and the
//! last one repeats. Every connect, command and close is recorded in a
//! [`MockJournal`] readable through the [`MockFactory`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandError, ConnectError, ExecutorFactory, RemoteExecutor};
use crate::config::HostTarget;

#[derive(Debug, Clone)]
enum MockResponse {
    Output(String),
    Fail(String),
}

/// Scripted behaviour of one host.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    unreachable: bool,
    connect_delay: Duration,
    command_delay: Duration,
    responses: HashMap<String, VecDeque<MockResponse>>,
}

impl MockHost {
    /// A reachable host that knows no commands yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose connection always fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Queue a successful response for `command`.
    pub fn respond(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses
            .entry(command.into())
            .or_default()
            .push_back(MockResponse::Output(output.into()));
        self
    }

    /// Queue a non-zero exit for `command`, with its partial output.
    pub fn fail(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses
            .entry(command.into())
            .or_default()
            .push_back(MockResponse::Fail(output.into()));
        self
    }

    /// Delay applied before `connect` resolves.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Delay applied before each command resolves.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }
}

/// What happened on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockJournal {
    pub connects: usize,
    pub closes: usize,
    pub commands: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    journals: Mutex<HashMap<String, MockJournal>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Executor produced by [`MockFactory`].
pub struct MockExecutor {
    address: String,
    script: MockHost,
    shared: Arc<Shared>,
    connected: bool,
    closed: bool,
}

impl MockExecutor {
    fn record(&self, f: impl FnOnce(&mut MockJournal)) {
        let mut journals = self.shared.journals.lock();
        f(journals.entry(self.address.clone()).or_default());
    }

    fn next_response(&mut self, command: &str) -> Option<MockResponse> {
        let queue = self.script.responses.get_mut(command)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.record(|j| j.connects += 1);
        if !self.script.connect_delay.is_zero() {
            tokio::time::sleep(self.script.connect_delay).await;
        }

        if self.closed {
            return Err(ConnectError::Closed);
        }
        if self.script.unreachable {
            return Err(ConnectError::Refused {
                host: self.address.clone(),
                message: "Connection refused".to_string(),
            });
        }

        self.connected = true;
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_active.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> Result<String, CommandError> {
        if !self.connected {
            return Err(CommandError::NotConnected);
        }
        self.record(|j| j.commands.push(command.to_string()));
        if !self.script.command_delay.is_zero() {
            tokio::time::sleep(self.script.command_delay).await;
        }

        match self.next_response(command) {
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::Fail(output)) => Err(CommandError::Failed {
                status: Some(1),
                output,
            }),
            None => Err(CommandError::Failed {
                status: Some(127),
                output: format!("sh: {}: command not found", command),
            }),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.connected {
            self.connected = false;
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.record(|j| j.closes += 1);
    }
}

/// Hands out scripted executors keyed by host address.
///
/// Hosts without a script are unreachable.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    hosts: HashMap<String, MockHost>,
    shared: Arc<Shared>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the host at `address`.
    pub fn host(mut self, address: impl Into<String>, script: MockHost) -> Self {
        self.hosts.insert(address.into(), script);
        self
    }

    /// Everything recorded for `address` so far.
    pub fn journal(&self, address: &str) -> MockJournal {
        self.shared
            .journals
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Highest number of hosts connected at the same time.
    pub fn peak_connections(&self) -> usize {
        self.shared.peak_active.load(Ordering::SeqCst)
    }
}

impl ExecutorFactory for MockFactory {
    type Executor = MockExecutor;

    fn executor(&self, host: &HostTarget) -> MockExecutor {
        MockExecutor {
            address: host.address.clone(),
            script: self
                .hosts
                .get(&host.address)
                .cloned()
                .unwrap_or_else(MockHost::unreachable),
            shared: Arc::clone(&self.shared),
            connected: false,
            closed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credential, MonitorSet};

    fn target(address: &str) -> HostTarget {
        HostTarget::new(
            address,
            22,
            "u",
            Credential::Password("p".to_string()),
            MonitorSet::default(),
        )
    }

    #[tokio::test]
    async fn test_responses_in_order_last_repeats() {
        let factory = MockFactory::new().host(
            "a",
            MockHost::new()
                .respond("cat /proc/stat", "first")
                .respond("cat /proc/stat", "second"),
        );
        let mut executor = factory.executor(&target("a"));
        executor.connect().await.unwrap();

        assert_eq!(executor.execute("cat /proc/stat").await.unwrap(), "first");
        assert_eq!(executor.execute("cat /proc/stat").await.unwrap(), "second");
        assert_eq!(executor.execute("cat /proc/stat").await.unwrap(), "second");

        let err = executor.execute("uptime").await.unwrap_err();
        assert!(err.partial_output().unwrap().contains("command not found"));

        executor.close().await;
        executor.close().await;

        let journal = factory.journal("a");
        assert_eq!(journal.connects, 1);
        assert_eq!(journal.closes, 1);
        assert_eq!(journal.commands.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_host_unreachable() {
        let factory = MockFactory::new();
        let mut executor = factory.executor(&target("nowhere"));
        assert!(matches!(
            executor.connect().await,
            Err(ConnectError::Refused { .. })
        ));
        assert!(matches!(
            executor.execute("true").await,
            Err(CommandError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_failed_command_carries_output() {
        let factory = MockFactory::new().host("a", MockHost::new().fail("df", "partial"));
        let mut executor = factory.executor(&target("a"));
        executor.connect().await.unwrap();

        let err = executor.execute("df").await.unwrap_err();
        assert_eq!(err.partial_output(), Some("partial"));
        executor.close().await;
    }
}
