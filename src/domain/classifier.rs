//! Status classifier: sorts every current node into status buckets.
//!
//! Classification is two explicit phases:
//!
//! 1. [`classify`] computes raw, overlapping membership: failed/changed by
//!    latest report status, unreported by missing report or staleness, pending
//!    by unapplied noop work, mismatch by inconsistent timestamps.
//! 2. [`apply_precedence`] subtracts by the named precedence policy
//!    `failed > unreported > pending > changed`, leaving each node in at most
//!    one of those buckets. Nodes left in none are `unchanged`.
//!
//! Neither phase fails on partial data: a missing report, summary or
//! timestamp degrades to a documented default.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::interval::RunInterval;
use super::records::{EventCounts, NodeRecord, ReportRecord, ReportStatus};
use super::types::NodeDetail;

#[derive(Debug, Clone, Copy)]
pub struct ClassifyOptions {
    /// Reference instant for staleness.
    pub now: DateTime<Utc>,
    /// Order node details by most recent report first.
    pub sort: bool,
    /// Compute the timestamp-consistency bucket.
    pub check_mismatch: bool,
}

impl ClassifyOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sort: true,
            check_mismatch: false,
        }
    }

    pub fn with_mismatch(mut self, check: bool) -> Self {
        self.check_mismatch = check;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusBuckets {
    pub failed: Vec<NodeDetail>,
    pub changed: Vec<NodeDetail>,
    pub unreported: Vec<NodeDetail>,
    pub mismatch: Vec<NodeDetail>,
    pub pending: Vec<NodeDetail>,
    /// Filled by [`apply_precedence`]: nodes in none of the exclusive buckets.
    pub unchanged: Vec<NodeDetail>,
}

impl StatusBuckets {
    pub fn population(&self) -> usize {
        self.failed.len()
            + self.changed.len()
            + self.unreported.len()
            + self.pending.len()
            + self.unchanged.len()
    }
}

/// Certnames of a bucket, in bucket order.
#[cfg(test)]
pub fn certnames(bucket: &[NodeDetail]) -> Vec<&str> {
    bucket.iter().map(|d| d.certname.as_str()).collect()
}

/// Phase 1: raw, overlapping bucket membership.
pub fn classify(
    nodes: &[NodeRecord],
    reports: &HashMap<String, ReportRecord>,
    events: &HashMap<String, EventCounts>,
    run_interval: RunInterval,
    options: ClassifyOptions,
) -> StatusBuckets {
    let mut buckets = StatusBuckets::default();

    for detail in merged(nodes, reports, events, options.sort) {
        let node = detail.node;
        let report = reports.get(&node.certname);
        let counts = detail.counts;
        let view = detail.view;

        match report.map(ReportRecord::report_status) {
            Some(ReportStatus::Failed) => buckets.failed.push(view.clone()),
            Some(ReportStatus::Changed) => buckets.changed.push(view.clone()),
            Some(_) => {}
            None => buckets.unreported.push(view.clone()),
        }

        // A node without a report is already listed above.
        if report.is_some() && run_interval.is_stale(node.report_timestamp, options.now) {
            buckets.unreported.push(view.clone());
        }

        let noop_pending = report.is_some_and(ReportRecord::has_pending_noop);
        if counts.noops > 0 || noop_pending {
            buckets.pending.push(view.clone());
        }

        if options.check_mismatch
            && run_interval.timestamps_mismatch(
                node.report_timestamp,
                node.catalog_timestamp,
                node.facts_timestamp,
            )
        {
            buckets.mismatch.push(view);
        }
    }

    buckets
}

/// Phase 2: precedence subtraction.
///
/// `failed` keeps everything, `unreported` drops failed ids, `pending` drops
/// failed and unreported ids, `changed` drops all three. `mismatch` is not
/// part of the chain; only unreported nodes are taken out of it. Whatever is
/// left of `all_nodes` becomes `unchanged`.
pub fn apply_precedence(mut buckets: StatusBuckets, all_nodes: &[NodeDetail]) -> StatusBuckets {
    let raw_unreported = ids(&buckets.unreported);

    let mut claimed = ids(&buckets.failed);
    buckets.unreported.retain(|d| !claimed.contains(&d.certname));
    claimed.extend(ids(&buckets.unreported));
    buckets.pending.retain(|d| !claimed.contains(&d.certname));
    claimed.extend(ids(&buckets.pending));
    buckets.changed.retain(|d| !claimed.contains(&d.certname));
    claimed.extend(ids(&buckets.changed));

    buckets
        .mismatch
        .retain(|d| !raw_unreported.contains(&d.certname));

    let mut seen = HashSet::new();
    buckets.unchanged = all_nodes
        .iter()
        .filter(|d| !claimed.contains(&d.certname) && seen.insert(d.certname.clone()))
        .cloned()
        .collect();

    buckets
}

/// The "all" view: every node merged with its event counters (all-zero when
/// absent), in input order or sorted.
pub fn merge_all(
    nodes: &[NodeRecord],
    reports: &HashMap<String, ReportRecord>,
    events: &HashMap<String, EventCounts>,
    sort: bool,
) -> Vec<NodeDetail> {
    let mut details: Vec<NodeDetail> = merged(nodes, reports, events, false)
        .into_iter()
        .map(|m| m.view)
        .collect();
    if sort {
        sort_by_latest_report(&mut details);
    }
    details
}

/// Order: most recent `report_timestamp` first, nodes without one last,
/// ties by certname ascending.
pub fn sort_by_latest_report(details: &mut [NodeDetail]) {
    details.sort_by(|a, b| {
        compare_latest(a.report_timestamp, b.report_timestamp, &a.certname, &b.certname)
    });
}

fn compare_latest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
    a_name: &str,
    b_name: &str,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a_name.cmp(b_name))
}

struct Merged<'a> {
    node: &'a NodeRecord,
    counts: EventCounts,
    view: NodeDetail,
}

fn merged<'a>(
    nodes: &'a [NodeRecord],
    reports: &HashMap<String, ReportRecord>,
    events: &HashMap<String, EventCounts>,
    sort: bool,
) -> Vec<Merged<'a>> {
    let mut out: Vec<Merged<'a>> = nodes
        .iter()
        .map(|node| {
            let counts = events.get(&node.certname).copied().unwrap_or_default();
            let status = reports
                .get(&node.certname)
                .and_then(|r| r.status.as_deref());
            Merged {
                node,
                counts,
                view: NodeDetail::merge(node, status, counts),
            }
        })
        .collect();

    if sort {
        out.sort_by(|a, b| {
            compare_latest(
                a.node.report_timestamp,
                b.node.report_timestamp,
                &a.node.certname,
                &b.node.certname,
            )
        });
    }
    out
}

fn ids(bucket: &[NodeDetail]) -> HashSet<String> {
    bucket.iter().map(|d| d.certname.clone()).collect()
}
