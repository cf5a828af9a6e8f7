//! `df -B1` tables.

use super::stat::counter;

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskRow {
    pub device: String,
    pub mount_point: String,
    pub total: f64,
    pub used: f64,
    pub free: f64,
    /// Taken from the `Use%` column as reported by `df`.
    pub usage_percent: f64,
}

/// Parse `df -B1` output: `Filesystem 1B-blocks Used Available Use% Mounted on`.
///
/// The first line is always treated as the header. Rows with fewer than six
/// columns or any unparsable number are skipped.
pub fn parse_disk_table(output: &str) -> Vec<DiskRow> {
    output.lines().skip(1).filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<DiskRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }

    let total = counter(fields[1])?;
    let used = counter(fields[2])?;
    let free = counter(fields[3])?;
    let usage_percent = counter(fields[4].trim_end_matches('%'))?;

    Some(DiskRow {
        device: fields[0].to_string(),
        mount_point: fields[5].to_string(),
        total,
        used,
        free,
        usage_percent,
    })
}
