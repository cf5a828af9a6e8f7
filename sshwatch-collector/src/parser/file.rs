//! Directory listings reshaped by `awk` into `size\ttimestamp\tname` lines.

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::debug;

/// Timestamps are truncated to this many characters (microsecond precision)
/// before parsing.
pub const TIMESTAMP_PREFIX_LEN: usize = 26;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One file entry from a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Base file name.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, Unix epoch seconds.
    pub modified: f64,
}

impl FileRecord {
    /// Minutes elapsed between the modification time and `now` (epoch seconds).
    pub fn age_minutes(&self, now: f64) -> f64 {
        (now - self.modified) / 60.0
    }
}

/// Parse the tab separated listing produced by the file check command.
///
/// Lines with the wrong number of fields, a non-integer size, an unparsable
/// timestamp or an empty name are skipped.
pub fn parse_file_listing(output: &str) -> Vec<FileRecord> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<FileRecord> {
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() != 3 {
        return None;
    }

    let size = parts[0].trim().parse::<u64>().ok()?;

    let timestamp = parts[1].trim();
    let timestamp = timestamp.get(..TIMESTAMP_PREFIX_LEN).unwrap_or(timestamp);
    let modified = match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
        Ok(t) => t.and_utc().timestamp() as f64,
        Err(e) => {
            debug!(timestamp = %timestamp, error = %e, "Failed to parse file timestamp");
            return None;
        }
    };

    let name = parts[2].trim();
    if name.is_empty() {
        return None;
    }
    let filename = Path::new(name)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    Some(FileRecord {
        filename,
        size,
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let output = "1024\t2024-01-15 10:30:45.123456789\tapp.log\n\
                      0\t2024-01-15 00:00:00.000000000\tempty.txt\n";
        let records = parse_file_listing(output);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename, "app.log");
        assert_eq!(records[0].size, 1024);
        // 2024-01-15T10:30:45Z
        assert_eq!(records[0].modified, 1_705_314_645.0);
        assert_eq!(records[1].filename, "empty.txt");
        assert_eq!(records[1].modified, 1_705_276_800.0);
    }

    #[test]
    fn test_total_line_dropped() {
        // `ls -l` starts with "total N", which awk turns into an empty size field
        let output = "\t \t\n2048\t2024-01-15 10:30:45.000000000\tdata.bin\n";
        let records = parse_file_listing(output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "data.bin");
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let output = "abc\t2024-01-15 10:30:45.000000000\tbad-size\n\
                      10\tyesterday\tbad-time\n\
                      10\t2024-01-15 10:30:45.000000000\n\
                      10\t2024-01-15 10:30:45.000000000\t \n\
                      10\t2024-01-15 10:30:45.000000000\tgood\n";
        let records = parse_file_listing(output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "good");
    }

    #[test]
    fn test_order_preserved() {
        let output = "1\t2024-01-01 00:00:00.000000000\tb\n\
                      2\t2024-01-01 00:00:00.000000000\ta\n";
        let names: Vec<_> = parse_file_listing(output)
            .into_iter()
            .map(|r| r.filename)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_age_minutes() {
        let record = FileRecord {
            filename: "x".into(),
            size: 0,
            modified: 1_000.0,
        };
        assert_eq!(record.age_minutes(1_600.0), 10.0);
    }
}
