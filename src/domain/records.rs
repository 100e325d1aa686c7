//! Records as returned by PuppetDB, and their decoding from raw job output.
//!
//! Decoding is lenient: a record that lacks a field the classifier needs is
//! logged and skipped, the rest of the batch is kept.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CensusError;

/// One managed host from the `nodes` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub certname: String,
    #[serde(default)]
    pub report_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub catalog_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub facts_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_report_status: Option<String>,
    #[serde(default)]
    pub deactivated: Option<DateTime<Utc>>,
}

#[cfg(test)]
impl NodeRecord {
    pub fn new(certname: &str) -> Self {
        Self {
            certname: certname.to_string(),
            report_timestamp: None,
            catalog_timestamp: None,
            facts_timestamp: None,
            latest_report_status: None,
            deactivated: None,
        }
    }
}

/// Latest configuration-run report of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub certname: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub receive_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub noop: Option<bool>,
    #[serde(default)]
    pub noop_pending: Option<bool>,
}

impl ReportRecord {
    pub fn report_status(&self) -> ReportStatus {
        ReportStatus::from(self.status.as_deref())
    }

    /// A noop run that left changes unapplied.
    pub fn has_pending_noop(&self) -> bool {
        self.noop.unwrap_or(false) && self.noop_pending.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Failed,
    Changed,
    Unchanged,
    Other(String),
    Missing,
}

impl From<Option<&str>> for ReportStatus {
    fn from(s: Option<&str>) -> Self {
        match s {
            Some("failed") => Self::Failed,
            Some("changed") => Self::Changed,
            Some("unchanged") => Self::Unchanged,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Missing,
        }
    }
}

/// Per-node event counters for the latest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub successes: u64,
    #[serde(default)]
    pub skips: u64,
    #[serde(default)]
    pub noops: u64,
}

/// One row of the `event-counts` endpoint summarized by certname.
#[derive(Debug, Clone, Deserialize)]
pub struct EventCountEntry {
    pub subject: EventSubject,
    #[serde(flatten)]
    pub counts: EventCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSubject {
    pub title: String,
}

/// Decode every element of `raw`, skipping (and logging) malformed ones.
pub fn decode_records<T: DeserializeOwned>(job: &str, raw: &[Value]) -> Vec<T> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<T>(value.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                let err = CensusError::MalformedRecord(format!("{}[{}]: {}", job, index, e));
                warn!(job = job, index = index, error = %err, "skipping record");
                None
            }
        })
        .collect()
}

/// Latest reports keyed by certname. A later duplicate replaces an earlier one.
pub fn reports_by_certname(reports: Vec<ReportRecord>) -> HashMap<String, ReportRecord> {
    reports
        .into_iter()
        .map(|r| (r.certname.clone(), r))
        .collect()
}

/// Event counters keyed by subject title (the node's certname).
pub fn events_by_certname(entries: Vec<EventCountEntry>) -> HashMap<String, EventCounts> {
    entries
        .into_iter()
        .map(|e| (e.subject.title, e.counts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_status_from_string() {
        assert_eq!(ReportStatus::from(Some("failed")), ReportStatus::Failed);
        assert_eq!(ReportStatus::from(Some("changed")), ReportStatus::Changed);
        assert_eq!(ReportStatus::from(Some("unchanged")), ReportStatus::Unchanged);
        assert_eq!(ReportStatus::from(None), ReportStatus::Missing);
        assert_eq!(
            ReportStatus::from(Some("weird")),
            ReportStatus::Other("weird".into())
        );
    }

    #[test]
    fn test_decode_skips_records_without_certname() {
        let raw = vec![
            json!({"certname": "a.example.com", "report_timestamp": "2024-06-01T11:50:00.000Z"}),
            json!({"report_timestamp": "2024-06-01T11:50:00.000Z"}),
            json!({"certname": "b.example.com", "report_timestamp": null}),
        ];
        let nodes: Vec<NodeRecord> = decode_records("all_nodes", &raw);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].certname, "a.example.com");
        assert!(nodes[0].report_timestamp.is_some());
        assert!(nodes[1].report_timestamp.is_none());
    }

    #[test]
    fn test_event_counts_keyed_by_subject_title() {
        let raw = vec![json!({
            "subject_type": "certname",
            "subject": {"title": "a.example.com"},
            "failures": 2,
            "successes": 5,
            "noops": 0,
            "skips": 1
        })];
        let events = events_by_certname(decode_records("event_counts", &raw));
        let counts = events["a.example.com"];
        assert_eq!(counts.failures, 2);
        assert_eq!(counts.successes, 5);
        assert_eq!(counts.skips, 1);
        assert_eq!(counts.noops, 0);
    }

    #[test]
    fn test_report_without_noop_flags_has_no_pending_noop() {
        let report: ReportRecord = serde_json::from_value(json!({
            "certname": "a",
            "status": "changed",
            "receive_time": "2024-06-01T11:00:00Z",
            "noop": true
        }))
        .unwrap();
        assert_eq!(report.report_status(), ReportStatus::Changed);
        assert!(report.end_time.is_none());
        assert!(!report.has_pending_noop());
    }
}
