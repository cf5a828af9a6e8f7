//! Per-host collection pass.
//!
//! A [`HostSampler`] opens one session to its host, emits the status facts,
//! runs every configured check in order and closes the session. Facts are
//! sent to the fleet channel as they are produced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{FileWatch, HostTarget, ProcessWatch};
use crate::executor::RemoteExecutor;
use crate::fact::{Fact, Metric, MetricRegistry};
use crate::parser::{
    count_matching, cpu_utilization, parse_cmdlines, parse_cpu_stat, parse_disk_table,
    parse_file_listing, parse_meminfo,
};

pub const CPU_STAT_COMMAND: &str = "cat /proc/stat";
pub const MEMINFO_COMMAND: &str = "cat /proc/meminfo";
pub const DISK_COMMAND: &str = "df -B1 -x tmpfs -x devtmpfs -x squashfs 2>/dev/null";

/// Default pause between the two `/proc/stat` reads.
pub const DEFAULT_CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Print every matching cmdline file, one per line.
pub fn process_command(path_pattern: &str) -> String {
    format!(
        "find /proc -maxdepth 2 -name 'cmdline' -path {} -exec cat {{}} \\; -exec echo \\; 2>/dev/null",
        shell_quote(path_pattern)
    )
}

/// List a directory as `size<TAB>date time<TAB>name` lines.
pub fn file_listing_command(path: &str) -> String {
    format!(
        "ls -lgb --full-time {} 2>/dev/null | awk '{{print $4\"\\t\"$5\" \"$6\"\\t\"$8}}'",
        shell_quote(path)
    )
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Builds facts through the registry and forwards them to the fleet channel.
struct FactSink {
    host: String,
    registry: Arc<MetricRegistry>,
    tx: mpsc::Sender<Fact>,
    as_of: i64,
}

impl FactSink {
    async fn emit(&self, metric: Metric, value: f64, labels: Vec<String>) -> usize {
        let fact = match self.registry.fact(metric, value, labels) {
            Ok(fact) => fact.with_as_of(self.as_of),
            Err(e) => {
                warn!(host = %self.host, error = %e, "Dropping fact");
                return 0;
            }
        };

        if self.tx.send(fact).await.is_err() {
            debug!(host = %self.host, "Snapshot receiver dropped");
            return 0;
        }
        1
    }
}

/// Runs the configured checks against one host.
pub struct HostSampler<E> {
    executor: E,
    target: Arc<HostTarget>,
    sink: FactSink,
    cpu_sample_interval: Duration,
}

impl<E: RemoteExecutor> HostSampler<E> {
    pub fn new(
        executor: E,
        target: Arc<HostTarget>,
        registry: Arc<MetricRegistry>,
        tx: mpsc::Sender<Fact>,
    ) -> Self {
        Self {
            sink: FactSink {
                host: target.address.clone(),
                registry,
                tx,
                as_of: 0,
            },
            executor,
            target,
            cpu_sample_interval: DEFAULT_CPU_SAMPLE_INTERVAL,
        }
    }

    /// Set the pause between the two `/proc/stat` reads.
    pub fn with_cpu_sample_interval(mut self, interval: Duration) -> Self {
        self.cpu_sample_interval = interval;
        self
    }

    /// Collect from the host. Returns the number of facts emitted.
    pub async fn run(mut self) -> usize {
        self.sink.as_of = chrono::Utc::now().timestamp_millis();
        let target = Arc::clone(&self.target);
        let host = target.address.as_str();

        if let Err(e) = self.executor.connect().await {
            warn!(host = %host, port = target.port, error = %e, "SSH connection failed");
            let count = self
                .sink
                .emit(Metric::HostSshStatus, 0.0, vec![host.to_string()])
                .await;
            self.executor.close().await;
            return count;
        }

        let mut count = 0;
        count += self
            .sink
            .emit(Metric::HostSshStatus, 1.0, vec![host.to_string()])
            .await;
        count += self
            .sink
            .emit(Metric::HostLastCheck, now_secs(), vec![host.to_string()])
            .await;

        for watch in &target.monitors.processes {
            count += self.collect_processes(watch).await;
        }

        for watch in &target.monitors.files {
            count += self.collect_files(watch).await;
        }

        if target.monitors.stat {
            count += self.collect_cpu().await;
            count += self.collect_memory().await;
            count += self.collect_disk().await;
        }

        self.executor.close().await;
        debug!(host = %host, facts = count, "Host collection finished");
        count
    }

    /// Count processes whose cmdline contains each pattern.
    async fn collect_processes(&mut self, watch: &ProcessWatch) -> usize {
        let Some(output) = self
            .run_check("process", &process_command(&watch.path_pattern))
            .await
        else {
            return 0;
        };

        let cmdlines = parse_cmdlines(&output);
        let mut count = 0;
        for pattern in &watch.patterns {
            let matches = count_matching(&cmdlines, pattern);
            count += self
                .sink
                .emit(
                    Metric::ProcessPatternCount,
                    matches as f64,
                    vec![self.target.address.clone(), pattern.clone()],
                )
                .await;
        }
        count
    }

    /// Size, modification time and age of every file in a directory.
    async fn collect_files(&mut self, watch: &FileWatch) -> usize {
        let Some(output) = self
            .run_check("files", &file_listing_command(&watch.path))
            .await
        else {
            return 0;
        };

        let labeler = watch.labeler();
        let now = now_secs();
        let mut count = 0;

        for record in parse_file_listing(&output) {
            for (name, value) in labeler.labels_for(&record.filename) {
                debug!(
                    host = %self.target.address,
                    path = %watch.path,
                    filename = %record.filename,
                    label = name,
                    value,
                    "File label matched"
                );
            }

            let labels = vec![
                self.target.address.clone(),
                watch.path.clone(),
                record.filename.clone(),
            ];
            count += self
                .sink
                .emit(Metric::FileSize, record.size as f64, labels.clone())
                .await;
            count += self
                .sink
                .emit(Metric::FileLastModified, record.modified, labels.clone())
                .await;
            count += self
                .sink
                .emit(Metric::FileAgeMinutes, record.age_minutes(now), labels)
                .await;
        }
        count
    }

    /// CPU counters from one `/proc/stat` read, then the usage rate from a
    /// second read after the sample interval.
    async fn collect_cpu(&mut self) -> usize {
        let Some(first) = self.run_check("cpu", CPU_STAT_COMMAND).await else {
            return 0;
        };
        let Some(first) = parse_cpu_stat(&first) else {
            debug!(host = %self.target.address, "No aggregate cpu line in /proc/stat");
            return 0;
        };

        let host = vec![self.target.address.clone()];
        let mut count = 0;
        for (metric, value) in [
            (Metric::CpuUserSeconds, first.user),
            (Metric::CpuSystemSeconds, first.system),
            (Metric::CpuIdleSeconds, first.idle),
            (Metric::CpuIowaitSeconds, first.iowait),
            (Metric::ContextSwitches, first.context_switches),
            (Metric::Interrupts, first.interrupts),
            (Metric::ProcessesRunning, first.procs_running),
            (Metric::ProcessesBlocked, first.procs_blocked),
        ] {
            count += self.sink.emit(metric, value, host.clone()).await;
        }

        tokio::time::sleep(self.cpu_sample_interval).await;

        let Some(second) = self.run_check("cpu", CPU_STAT_COMMAND).await else {
            return count;
        };
        let Some(second) = parse_cpu_stat(&second) else {
            debug!(host = %self.target.address, "Second /proc/stat read unparsable");
            return count;
        };

        match cpu_utilization(&first, &second) {
            Some(usage) => count += self.sink.emit(Metric::CpuUsage, usage, host).await,
            None => debug!(host = %self.target.address, "CPU time did not advance"),
        }
        count
    }

    async fn collect_memory(&mut self) -> usize {
        let Some(output) = self.run_check("memory", MEMINFO_COMMAND).await else {
            return 0;
        };
        let Some(memory) = parse_meminfo(&output) else {
            debug!(host = %self.target.address, "No known keys in /proc/meminfo");
            return 0;
        };

        let host = vec![self.target.address.clone()];
        let mut count = 0;
        for (metric, value) in [
            (Metric::MemoryTotal, memory.total),
            (Metric::MemoryFree, memory.free),
            (Metric::MemoryAvailable, memory.available),
            (Metric::MemoryBuffers, memory.buffers),
            (Metric::MemoryCached, memory.cached),
            (Metric::MemoryUsagePercent, memory.usage_percent),
        ] {
            count += self.sink.emit(metric, value, host.clone()).await;
        }
        count
    }

    async fn collect_disk(&mut self) -> usize {
        let Some(output) = self.run_check("disk", DISK_COMMAND).await else {
            return 0;
        };

        let mut count = 0;
        for row in parse_disk_table(&output) {
            let labels = vec![
                self.target.address.clone(),
                row.device.clone(),
                row.mount_point.clone(),
            ];
            for (metric, value) in [
                (Metric::DiskTotal, row.total),
                (Metric::DiskUsed, row.used),
                (Metric::DiskFree, row.free),
                (Metric::DiskUsagePercent, row.usage_percent),
            ] {
                count += self.sink.emit(metric, value, labels.clone()).await;
            }
        }
        count
    }

    /// Run a check command. Failures are logged and yield `None`.
    async fn run_check(&mut self, check: &str, command: &str) -> Option<String> {
        match self.executor.execute(command).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(
                    host = %self.target.address,
                    check,
                    error = %e,
                    partial_output = e.partial_output().map(str::len).unwrap_or(0),
                    "Check failed, skipping"
                );
                None
            }
        }
    }
}
