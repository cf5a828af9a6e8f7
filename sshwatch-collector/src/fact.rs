//! Fact model and the metric descriptor registry.
//!
//! A [`Fact`] is one `(metric, labels, value)` emission. Every metric the
//! collector can emit is described once in a [`MetricRegistry`], which fixes
//! its name, help text, value kind and label names. Facts are only built
//! through the registry so their label arity always matches the descriptor.

use std::collections::HashMap;

use thiserror::Error;

/// Errors raised while building a fact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactError {
    #[error("Metric '{metric}' expects {expected} labels, got {actual}")]
    LabelArity {
        metric: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Metric '{0}' is not registered")]
    Unregistered(&'static str),
}

/// How a value behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Monotonically increasing since some origin (boot, usually).
    Counter,
    /// Instantaneous value.
    Gauge,
}

impl ValueKind {
    /// Get the TYPE string used in the Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Counter => "counter",
            ValueKind::Gauge => "gauge",
        }
    }
}

/// Identity of every metric the collector emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    HostSshStatus,
    HostLastCheck,
    ProcessPatternCount,
    FileSize,
    FileLastModified,
    FileAgeMinutes,
    CpuUserSeconds,
    CpuSystemSeconds,
    CpuIdleSeconds,
    CpuIowaitSeconds,
    ContextSwitches,
    Interrupts,
    ProcessesRunning,
    ProcessesBlocked,
    CpuUsage,
    MemoryTotal,
    MemoryFree,
    MemoryAvailable,
    MemoryBuffers,
    MemoryCached,
    MemoryUsagePercent,
    DiskTotal,
    DiskUsed,
    DiskFree,
    DiskUsagePercent,
}

const HOST: &[&str] = &["host"];
const HOST_PATTERN: &[&str] = &["host", "pattern"];
const HOST_FILE: &[&str] = &["host", "path", "filename"];
const HOST_DISK: &[&str] = &["host", "device", "mount_point"];

/// Descriptor of a single metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    pub metric: Metric,
    pub name: &'static str,
    pub help: &'static str,
    pub kind: ValueKind,
    pub labels: &'static [&'static str],
}

impl MetricDesc {
    const fn new(
        metric: Metric,
        name: &'static str,
        help: &'static str,
        kind: ValueKind,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            metric,
            name,
            help,
            kind,
            labels,
        }
    }
}

/// The fixed set of descriptors, in exposition order.
const STANDARD_METRICS: &[MetricDesc] = &[
    MetricDesc::new(
        Metric::HostSshStatus,
        "host_ssh_status",
        "SSH connection status to host (1: success, 0: failure)",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::HostLastCheck,
        "host_last_check_timestamp",
        "Last successful check timestamp of host",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::ProcessPatternCount,
        "process_pattern_count",
        "Count of pattern in process cmdlines",
        ValueKind::Gauge,
        HOST_PATTERN,
    ),
    MetricDesc::new(
        Metric::FileSize,
        "file_size_bytes",
        "File size in bytes",
        ValueKind::Gauge,
        HOST_FILE,
    ),
    MetricDesc::new(
        Metric::FileLastModified,
        "file_last_modified_timestamp",
        "Last modified timestamp of file",
        ValueKind::Gauge,
        HOST_FILE,
    ),
    MetricDesc::new(
        Metric::FileAgeMinutes,
        "file_age_minutes",
        "Minutes since last modification",
        ValueKind::Gauge,
        HOST_FILE,
    ),
    MetricDesc::new(
        Metric::CpuUserSeconds,
        "cpu_user_seconds_total",
        "Total CPU time spent in user mode",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::CpuSystemSeconds,
        "cpu_system_seconds_total",
        "Total CPU time spent in system mode",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::CpuIdleSeconds,
        "cpu_idle_seconds_total",
        "Total CPU idle time",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::CpuIowaitSeconds,
        "cpu_iowait_seconds_total",
        "Total CPU time waiting for I/O",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::ContextSwitches,
        "context_switches_total",
        "Total number of context switches",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::Interrupts,
        "interrupts_total",
        "Total number of interrupts",
        ValueKind::Counter,
        HOST,
    ),
    MetricDesc::new(
        Metric::ProcessesRunning,
        "processes_running",
        "Number of processes in running state",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::ProcessesBlocked,
        "processes_blocked",
        "Number of processes blocked waiting for I/O",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::CpuUsage,
        "cpu_usage_percent",
        "CPU usage as a fraction between 0 and 1",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryTotal,
        "memory_total_bytes",
        "Total memory in bytes",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryFree,
        "memory_free_bytes",
        "Free memory in bytes",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryAvailable,
        "memory_available_bytes",
        "Available memory in bytes",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryBuffers,
        "memory_buffers_bytes",
        "Memory used for buffers in bytes",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryCached,
        "memory_cached_bytes",
        "Memory used for cache in bytes",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::MemoryUsagePercent,
        "memory_usage_percent",
        "Memory usage percentage",
        ValueKind::Gauge,
        HOST,
    ),
    MetricDesc::new(
        Metric::DiskTotal,
        "disk_total_bytes",
        "Total disk space in bytes",
        ValueKind::Gauge,
        HOST_DISK,
    ),
    MetricDesc::new(
        Metric::DiskUsed,
        "disk_used_bytes",
        "Used disk space in bytes",
        ValueKind::Gauge,
        HOST_DISK,
    ),
    MetricDesc::new(
        Metric::DiskFree,
        "disk_free_bytes",
        "Free disk space in bytes",
        ValueKind::Gauge,
        HOST_DISK,
    ),
    MetricDesc::new(
        Metric::DiskUsagePercent,
        "disk_usage_percent",
        "Disk usage percentage",
        ValueKind::Gauge,
        HOST_DISK,
    ),
];

/// Registry of metric descriptors, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    descs: Vec<MetricDesc>,
    index: HashMap<Metric, usize>,
}

impl MetricRegistry {
    /// Build the registry holding every metric the collector emits.
    pub fn standard() -> Self {
        Self::from_descs(STANDARD_METRICS.to_vec())
    }

    fn from_descs(descs: Vec<MetricDesc>) -> Self {
        let index = descs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.metric, i))
            .collect();
        Self { descs, index }
    }

    /// Look up a descriptor.
    pub fn describe(&self, metric: Metric) -> Option<&MetricDesc> {
        self.index.get(&metric).map(|&i| &self.descs[i])
    }

    /// Look up a descriptor by its exposition name.
    pub fn by_name(&self, name: &str) -> Option<&MetricDesc> {
        self.descs.iter().find(|d| d.name == name)
    }

    /// All descriptors in exposition order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricDesc> {
        self.descs.iter()
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Build a fact, checking the label arity against the descriptor.
    pub fn fact(
        &self,
        metric: Metric,
        value: f64,
        labels: Vec<String>,
    ) -> Result<Fact, FactError> {
        let desc = self
            .describe(metric)
            .ok_or(FactError::Unregistered(metric_name_hint(metric)))?;

        if labels.len() != desc.labels.len() {
            return Err(FactError::LabelArity {
                metric: desc.name,
                expected: desc.labels.len(),
                actual: labels.len(),
            });
        }

        Ok(Fact {
            metric,
            name: desc.name,
            kind: desc.kind,
            value,
            labels,
            as_of: None,
        })
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn metric_name_hint(metric: Metric) -> &'static str {
    STANDARD_METRICS
        .iter()
        .find(|d| d.metric == metric)
        .map(|d| d.name)
        .unwrap_or("unknown")
}

/// One `(metric, labels, value)` emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    metric: Metric,
    name: &'static str,
    kind: ValueKind,
    value: f64,
    labels: Vec<String>,
    as_of: Option<i64>,
}

impl Fact {
    /// Attach the wall-clock time (Unix millis) the sample was taken at.
    pub fn with_as_of(mut self, timestamp_millis: i64) -> Self {
        self.as_of = Some(timestamp_millis);
        self
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Label values, in the order declared by the descriptor. The host is first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The host label.
    pub fn host(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or("")
    }

    pub fn as_of(&self) -> Option<i64> {
        self.as_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_names_unique() {
        let registry = MetricRegistry::standard();
        let mut names: Vec<_> = registry.iter().map(|d| d.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.len());
    }

    #[test]
    fn test_every_metric_starts_with_host_label() {
        let registry = MetricRegistry::standard();
        for desc in registry.iter() {
            assert_eq!(desc.labels.first(), Some(&"host"), "{}", desc.name);
        }
    }

    #[test]
    fn test_fact_arity_checked() {
        let registry = MetricRegistry::standard();

        let fact = registry
            .fact(
                Metric::ProcessPatternCount,
                2.0,
                vec!["web01".into(), "nginx".into()],
            )
            .unwrap();
        assert_eq!(fact.name(), "process_pattern_count");
        assert_eq!(fact.host(), "web01");
        assert_eq!(fact.kind(), ValueKind::Gauge);

        let err = registry
            .fact(Metric::DiskTotal, 1.0, vec!["web01".into()])
            .unwrap_err();
        assert_eq!(
            err,
            FactError::LabelArity {
                metric: "disk_total_bytes",
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn test_unregistered_metric() {
        let registry = MetricRegistry::from_descs(STANDARD_METRICS[..1].to_vec());
        let err = registry
            .fact(Metric::CpuUsage, 0.5, vec!["h".into()])
            .unwrap_err();
        assert_eq!(err, FactError::Unregistered("cpu_usage_percent"));
    }

    #[test]
    fn test_counter_kinds() {
        let registry = MetricRegistry::standard();
        assert_eq!(
            registry.describe(Metric::CpuUserSeconds).unwrap().kind,
            ValueKind::Counter
        );
        assert_eq!(
            registry.by_name("memory_usage_percent").unwrap().kind,
            ValueKind::Gauge
        );
        assert_eq!(ValueKind::Counter.as_str(), "counter");
    }

    #[test]
    fn test_as_of() {
        let registry = MetricRegistry::standard();
        let fact = registry
            .fact(Metric::HostSshStatus, 1.0, vec!["h".into()])
            .unwrap()
            .with_as_of(1_700_000_000_000);
        assert_eq!(fact.as_of(), Some(1_700_000_000_000));
    }
}
