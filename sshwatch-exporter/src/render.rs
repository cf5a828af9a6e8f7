//! Prometheus text exposition (format 0.0.4) of a scrape snapshot.

use std::collections::HashMap;
use std::fmt::Write;

use sshwatch_collector::{Fact, Metric, MetricRegistry, Snapshot};

/// Content type of the rendered text.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render `snapshot`.
///
/// Metrics appear in registry order, each with its `# HELP` and `# TYPE`
/// lines followed by one sample per fact in arrival order. Metrics without
/// facts are omitted. Two gauges describing the scrape itself close the
/// output.
pub fn render(snapshot: &Snapshot, registry: &MetricRegistry) -> String {
    let mut by_metric: HashMap<Metric, Vec<&Fact>> = HashMap::new();
    for fact in snapshot.facts() {
        by_metric.entry(fact.metric()).or_default().push(fact);
    }

    let mut output = String::with_capacity(snapshot.len() * 80);

    for desc in registry.iter() {
        let Some(facts) = by_metric.get(&desc.metric) else {
            continue;
        };

        writeln!(output, "# HELP {} {}", desc.name, escape_help(desc.help)).ok();
        writeln!(output, "# TYPE {} {}", desc.name, desc.kind.as_str()).ok();

        for fact in facts {
            writeln!(
                output,
                "{}{} {}",
                desc.name,
                format_labels(desc.labels, fact.labels()),
                format_value(fact.value())
            )
            .ok();
        }
    }

    writeln!(
        output,
        "# HELP sshwatch_scrape_duration_seconds Duration of the last fleet scrape"
    )
    .ok();
    writeln!(output, "# TYPE sshwatch_scrape_duration_seconds gauge").ok();
    writeln!(
        output,
        "sshwatch_scrape_duration_seconds {}",
        format_value(snapshot.elapsed().as_secs_f64())
    )
    .ok();

    writeln!(
        output,
        "# HELP sshwatch_scrape_facts Number of samples gathered by the last fleet scrape"
    )
    .ok();
    writeln!(output, "# TYPE sshwatch_scrape_facts gauge").ok();
    writeln!(output, "sshwatch_scrape_facts {}", snapshot.len()).ok();

    output
}

/// Escape a label value for Prometheus.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Pair label names with values, in declared order.
fn format_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
