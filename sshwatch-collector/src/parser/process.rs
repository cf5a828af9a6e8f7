//! Process command line listings.

/// Split the concatenated `/proc/<pid>/cmdline` dump into one string per process.
///
/// Argument separators (NUL bytes) become spaces; blank lines are dropped.
pub fn parse_cmdlines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.replace('\0', " ").trim().to_string())
        .filter(|cmdline| !cmdline.is_empty())
        .collect()
}

/// Count the command lines containing `pattern`, once per command line.
pub fn count_matching(cmdlines: &[String], pattern: &str) -> usize {
    cmdlines.iter().filter(|c| c.contains(pattern)).count()
}
