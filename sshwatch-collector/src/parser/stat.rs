//! `/proc/stat` and `/proc/meminfo` parsing, plus the CPU utilization rate.

use tracing::warn;

/// Kernel clock ticks per second used by `/proc/stat` time columns.
pub const USER_HZ: f64 = 100.0;

/// One read of `/proc/stat`. Time fields are in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuSample {
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    /// user + nice + system + idle + iowait + irq + softirq + steal.
    ///
    /// guest and guest_nice are already accounted for in user and nice.
    pub total: f64,
    pub context_switches: f64,
    pub interrupts: f64,
    pub procs_running: f64,
    pub procs_blocked: f64,
}

/// Memory figures from `/proc/meminfo`, in bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySample {
    pub total: f64,
    pub free: f64,
    pub available: f64,
    pub buffers: f64,
    pub cached: f64,
    /// (total - available) / total * 100, within [0, 100]; 0 when total is 0.
    pub usage_percent: f64,
}

/// Parse `/proc/stat`.
///
/// Returns `None` unless an aggregate `cpu` line with at least eight numeric
/// time columns is present.
pub fn parse_cpu_stat(output: &str) -> Option<CpuSample> {
    let mut sample = CpuSample::default();
    let mut have_cpu = false;

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&key) = fields.first() else {
            continue;
        };

        match key {
            // cpu user nice system idle iowait irq softirq steal guest guest_nice
            "cpu" => {
                if fields.len() < 9 {
                    continue;
                }
                let Some(ticks) = fields[1..9]
                    .iter()
                    .map(|f| counter(f))
                    .collect::<Option<Vec<f64>>>()
                else {
                    continue;
                };

                let [user, nice, system, idle, iowait, irq, softirq, steal] = ticks[..] else {
                    continue;
                };

                sample.user = user / USER_HZ;
                sample.system = system / USER_HZ;
                sample.idle = idle / USER_HZ;
                sample.iowait = iowait / USER_HZ;
                sample.total =
                    (user + nice + system + idle + iowait + irq + softirq + steal) / USER_HZ;
                have_cpu = true;
            }
            "ctxt" => {
                if let Some(v) = second_field(&fields) {
                    sample.context_switches = v;
                }
            }
            "intr" => {
                // the first number is the total, per-IRQ counts follow
                if let Some(v) = second_field(&fields) {
                    sample.interrupts = v;
                }
            }
            "procs_running" => {
                if let Some(v) = second_field(&fields) {
                    sample.procs_running = v;
                }
            }
            "procs_blocked" => {
                if let Some(v) = second_field(&fields) {
                    sample.procs_blocked = v;
                }
            }
            _ => {}
        }
    }

    have_cpu.then_some(sample)
}

fn second_field(fields: &[&str]) -> Option<f64> {
    fields.get(1).and_then(|v| counter(v))
}

/// Kernel counters are unsigned integers; `inf` or `nan` never parse.
pub(crate) fn counter(field: &str) -> Option<f64> {
    field.parse::<u64>().ok().map(|v| v as f64)
}

/// Fraction of non-idle CPU time between two samples, clamped to [0, 1].
///
/// Returns `None` when the total time did not advance or either sample holds
/// a non-finite value.
pub fn cpu_utilization(first: &CpuSample, second: &CpuSample) -> Option<f64> {
    let total_delta = second.total - first.total;
    let idle_delta = second.idle - first.idle;

    if total_delta <= 0.0 || !total_delta.is_finite() || !idle_delta.is_finite() {
        return None;
    }

    let usage = 1.0 - idle_delta / total_delta;
    if !usage.is_finite() {
        return None;
    }
    if usage < 0.0 {
        warn!(usage, total_delta, idle_delta, "Negative CPU usage, clamping to 0");
        Some(0.0)
    } else if usage > 1.0 {
        warn!(usage, total_delta, idle_delta, "CPU usage above 1, clamping to 1");
        Some(1.0)
    } else {
        Some(usage)
    }
}

/// Parse `/proc/meminfo`.
///
/// Values are converted from kB to bytes. Returns `None` when none of the
/// tracked keys is present.
pub fn parse_meminfo(output: &str) -> Option<MemorySample> {
    let mut sample = MemorySample::default();
    let mut recognized = 0usize;

    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some(value) = counter(value) else {
            continue;
        };

        let key = key.strip_suffix(':').unwrap_or(key);
        let bytes = value * 1024.0;

        let slot = match key {
            "MemTotal" => &mut sample.total,
            "MemFree" => &mut sample.free,
            "MemAvailable" => &mut sample.available,
            "Buffers" => &mut sample.buffers,
            "Cached" => &mut sample.cached,
            _ => continue,
        };
        *slot = bytes;
        recognized += 1;
    }

    if recognized == 0 {
        return None;
    }

    if sample.total > 0.0 {
        let used = sample.total - sample.available;
        sample.usage_percent = (used / sample.total * 100.0).clamp(0.0, 100.0);
    }

    Some(sample)
}
