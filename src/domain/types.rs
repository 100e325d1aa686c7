use async_graphql::{Enum, SimpleObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::records::{EventCounts, NodeRecord};

/// One node merged with its event counters, as shown in detail views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct NodeDetail {
    pub certname: String,
    pub report_timestamp: Option<DateTime<Utc>>,
    pub catalog_timestamp: Option<DateTime<Utc>>,
    pub facts_timestamp: Option<DateTime<Utc>>,
    pub latest_report_status: Option<String>,
    pub failures: u64,
    pub successes: u64,
    pub skips: u64,
    pub noops: u64,
}

impl NodeDetail {
    pub fn merge(node: &NodeRecord, report_status: Option<&str>, events: EventCounts) -> Self {
        Self {
            certname: node.certname.clone(),
            report_timestamp: node.report_timestamp,
            catalog_timestamp: node.catalog_timestamp,
            facts_timestamp: node.facts_timestamp,
            latest_report_status: report_status
                .map(str::to_string)
                .or_else(|| node.latest_report_status.clone()),
            failures: events.failures,
            successes: events.successes,
            skips: events.skips,
            noops: events.noops,
        }
    }
}

/// Which node list a detail view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
pub enum DashboardView {
    #[default]
    Recent,
    Failed,
    Unreported,
    Changed,
    Mismatch,
    Pending,
}

impl DashboardView {
    /// Unknown names fall back to `recent`.
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("failed") => Self::Failed,
            Some("unreported") => Self::Unreported,
            Some("changed") => Self::Changed,
            Some("mismatch") => Self::Mismatch,
            Some("pending") | Some("noop") => Self::Pending,
            _ => Self::Recent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Failed => "failed",
            Self::Unreported => "unreported",
            Self::Changed => "changed",
            Self::Mismatch => "mismatch",
            Self::Pending => "pending",
        }
    }
}

/// Population metrics and per-bucket counts.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct DashboardStatus {
    pub source: String,
    pub population: u64,
    pub total_resource: f64,
    /// Average resources per node, two decimals.
    pub avg_resource: String,
    pub failed_nodes: u64,
    pub changed_nodes: u64,
    pub unreported_nodes: u64,
    pub mismatching_timestamps: u64,
    pub pending_nodes: u64,
    pub unchanged_nodes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct DashboardNodes {
    pub source: String,
    pub selected_view: DashboardView,
    pub node_list: Vec<NodeDetail>,
}

/// Status counts and a detail view computed from one job batch.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct Dashboard {
    pub status: DashboardStatus,
    pub nodes: DashboardNodes,
}

/// Counts computed by server-side status queries.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct ServerCounts {
    pub source: String,
    pub selected_view: Option<DashboardView>,
    pub population: Option<u64>,
    pub total_resource: f64,
    pub avg_resource: String,
    pub failed_nodes: Option<u64>,
    pub changed_nodes: Option<u64>,
    pub noop_nodes: Option<u64>,
    pub unreported_nodes: Option<u64>,
}

/// A configured PuppetDB source, without credentials.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct SourceSummary {
    pub name: String,
    pub url: String,
    pub api_version: u32,
    pub verify_tls: bool,
    pub run_time_minutes: i64,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct DaemonHealth {
    pub version: String,
    pub uptime_secs: u64,
    pub sources: u64,
}
