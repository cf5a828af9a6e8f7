//! Agentless telemetry collection over SSH.
//!
//! A [`FleetCollector`] fans out one worker per configured host. Each worker
//! runs a [`HostSampler`] that opens a single session through a
//! [`RemoteExecutor`], issues a fixed sequence of shell commands and turns
//! their output into [`Fact`]s:
//!
//! ```text
//! connect ─┬─ fail ──> host_ssh_status 0
//!          └─ ok ────> host_ssh_status 1, host_last_check_timestamp
//!                      process counts  (find /proc ... cmdline)
//!                      file facts      (ls -lgb --full-time | awk)
//!                      cpu, cpu usage  (/proc/stat twice, one interval apart)
//!                      memory          (/proc/meminfo)
//!                      disk            (df -B1)
//! ```
//!
//! The facts of all hosts are merged into one [`Snapshot`].

pub mod config;
pub mod executor;
pub mod fact;
pub mod fleet;
pub mod parser;
pub mod sampler;

pub use config::{
    ConfigError, Credential, FileLabelRule, FileWatch, HostConfig, HostTarget, MonitorSet,
    ProcessWatch, SshConfig,
};
pub use executor::{
    CommandError, ConnectError, ExecutorFactory, RemoteExecutor, SshExecutor, SshExecutorFactory,
};
pub use fact::{Fact, FactError, Metric, MetricDesc, MetricRegistry, ValueKind};
pub use fleet::{FleetCollector, FleetSettings, Snapshot};
pub use sampler::HostSampler;
