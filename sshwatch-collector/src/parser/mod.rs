//! Parsers for the text produced by the remote diagnostic commands.
//!
//! Every parser is a pure function of its input. Malformed lines are dropped
//! rather than reported, except for the CPU and memory blocks, whose fields
//! depend on each other: those return `None` when the block is unusable.

mod disk;
mod file;
mod process;
mod stat;

pub use disk::{DiskRow, parse_disk_table};
pub use file::{FileRecord, TIMESTAMP_PREFIX_LEN, parse_file_listing};
pub use process::{count_matching, parse_cmdlines};
pub use stat::{CpuSample, MemorySample, USER_HZ, cpu_utilization, parse_cpu_stat, parse_meminfo};
