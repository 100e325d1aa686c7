//! Rendering of census results for the terminal (`--format table|json`).

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use serde_json::Value;

use crate::domain::types::{DashboardNodes, DashboardStatus, NodeDetail};

pub fn print_output<T: Serialize>(format: &str, data: &T) -> Result<()> {
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
        _ => {
            // Table format: recursive key-value from serde_json::Value
            let value = serde_json::to_value(data)?;
            print_value(&value, 0);
        }
    }
    Ok(())
}

pub fn print_status(format: &str, status: &DashboardStatus) -> Result<()> {
    if format == "json" {
        return print_output(format, status);
    }

    println!("{} {}", "Census of".bold(), status.source.bold());
    println!();
    println!("  {:<22} {}", "population", status.population);
    println!("  {:<22} {}", "total resources", status.total_resource);
    println!("  {:<22} {}", "avg resources/node", status.avg_resource);
    println!();
    println!("  {:<22} {}", "failed", count(status.failed_nodes, |s| s.red().bold()));
    println!("  {:<22} {}", "unreported", count(status.unreported_nodes, |s| s.yellow().bold()));
    println!("  {:<22} {}", "pending (noop)", count(status.pending_nodes, |s| s.cyan()));
    println!("  {:<22} {}", "changed", count(status.changed_nodes, |s| s.blue()));
    println!("  {:<22} {}", "unchanged", status.unchanged_nodes.to_string().green());
    println!(
        "  {:<22} {}",
        "mismatched timestamps",
        count(status.mismatching_timestamps, |s| s.yellow())
    );
    Ok(())
}

pub fn print_nodes(format: &str, nodes: &DashboardNodes) -> Result<()> {
    if format == "json" {
        return print_output(format, nodes);
    }

    println!(
        "{} {} ({} nodes)",
        nodes.selected_view.as_str().bold(),
        nodes.source.dimmed(),
        nodes.node_list.len()
    );
    if nodes.node_list.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "  {:<40} {:<10} {:<25} {:>5} {:>5} {:>5} {:>5}",
        "certname", "status", "last report", "fail", "ok", "skip", "noop"
    );
    for detail in &nodes.node_list {
        println!("  {}", node_row(detail));
    }
    Ok(())
}

/// Zero counts stay plain so non-zero buckets stand out.
fn count(n: u64, paint: impl Fn(&str) -> ColoredString) -> ColoredString {
    let text = n.to_string();
    if n == 0 {
        text.normal()
    } else {
        paint(&text)
    }
}

fn node_row(detail: &NodeDetail) -> String {
    let last_report = detail
        .report_timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "{:<40} {:<10} {:<25} {:>5} {:>5} {:>5} {:>5}",
        detail.certname,
        detail.latest_report_status.as_deref().unwrap_or("-"),
        last_report,
        detail.failures,
        detail.successes,
        detail.skips,
        detail.noops
    )
}

fn print_value(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        println!("{}{}:", pad, key);
                        print_value(val, indent + 1);
                    }
                    Value::Array(arr) => {
                        if arr.is_empty() {
                            println!("{}{}: []", pad, key);
                        } else if arr.iter().all(|v| !v.is_object() && !v.is_array()) {
                            let items: Vec<String> = arr.iter().map(format_scalar).collect();
                            println!("{}{}: {}", pad, key, items.join(", "));
                        } else {
                            println!("{}{}:", pad, key);
                            for (i, item) in arr.iter().enumerate() {
                                if item.is_object() {
                                    println!("{}  [{}]:", pad, i);
                                    print_value(item, indent + 2);
                                } else {
                                    println!("{}  - {}", pad, format_scalar(item));
                                }
                            }
                        }
                    }
                    _ => {
                        println!("{}{}: {}", pad, key, format_scalar(val));
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                if item.is_object() {
                    println!("{}[{}]:", pad, i);
                    print_value(item, indent + 1);
                } else {
                    println!("{}- {}", pad, format_scalar(item));
                }
            }
        }
        _ => {
            println!("{}{}", pad, format_scalar(value));
        }
    }
}

/// Scalars print bare; `null` marks a count that was not computed.
fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn detail(certname: &str) -> NodeDetail {
        NodeDetail {
            certname: certname.to_string(),
            report_timestamp: None,
            catalog_timestamp: None,
            facts_timestamp: None,
            latest_report_status: None,
            failures: 0,
            successes: 0,
            skips: 0,
            noops: 0,
        }
    }

    #[test]
    fn test_node_row_without_report() {
        let row = node_row(&detail("new1.example.com"));
        assert!(row.starts_with("new1.example.com"));
        assert!(row.contains("never"));
        assert!(row.contains(" - "));
    }

    #[test]
    fn test_node_row_with_report() {
        let mut d = detail("web1");
        d.report_timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        d.latest_report_status = Some("failed".into());
        d.failures = 3;
        let row = node_row(&d);
        assert!(row.contains("2024-03-01 12:30:00 UTC"));
        assert!(row.contains("failed"));
        assert!(row.trim_end().ends_with('0'));
    }

    #[test]
    fn test_format_scalar() {
        assert_eq!(format_scalar(&json!("prod")), "prod");
        assert_eq!(format_scalar(&json!(null)), "-");
        assert_eq!(format_scalar(&json!(12.5)), "12.5");
        assert_eq!(format_scalar(&json!(true)), "true");
    }
}
