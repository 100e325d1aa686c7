//! Dashboard service: the request-level call sites of the census engine.
//!
//! Each call builds a job set for one source, runs it as a single batch under
//! the outer request deadline, decodes the records it needs and hands them to
//! the classifier. The call sites differ only in their job sets; sorting and
//! precedence are shared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::classifier::{self, ClassifyOptions, StatusBuckets};
use super::job_runner::{JobRunner, Transport};
use super::jobs::{Endpoint, JobDescriptor, JobResults, JobSet, Metric, Paging, SourceTarget};
use super::records::{
    decode_records, events_by_certname, reports_by_certname, EventCountEntry, EventCounts,
    NodeRecord, ReportRecord,
};
use super::types::{
    DaemonHealth, Dashboard, DashboardNodes, DashboardStatus, DashboardView, ServerCounts,
    SourceSummary,
};
use crate::config::{Config, SourceContext};
use crate::error::{CensusError, Result};
use crate::query::Query;

pub const TOT_RESOURCE: &str = "tot_resource";
pub const AVG_RESOURCE: &str = "avg_resource";
pub const ALL_NODES: &str = "all_nodes";
pub const REPORTS: &str = "reports";
pub const EVENT_COUNTS: &str = "event_counts";
pub const RECENT_NODES: &str = "nodes";
pub const FAILED_NODES: &str = "failed_nodes";
pub const CHANGED_NODES: &str = "changed_nodes";
pub const NOOP_NODES: &str = "noop_nodes";
pub const UNREPORTED_NODES: &str = "unreported_nodes";

pub struct DashboardService {
    config: Arc<Config>,
    runner: JobRunner,
    started: Instant,
}

/// Decoded inputs of one census plus their classification.
struct Census {
    population: usize,
    buckets: StatusBuckets,
    reports: HashMap<String, ReportRecord>,
    events: HashMap<String, EventCounts>,
}

impl DashboardService {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        let runner = JobRunner::new(transport, config.jobs.job_timeout());
        Self {
            config,
            runner,
            started: Instant::now(),
        }
    }

    pub fn health(&self) -> DaemonHealth {
        DaemonHealth {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            sources: self.config.sources.len() as u64,
        }
    }

    pub fn sources(&self) -> Vec<SourceSummary> {
        self.config.source_summaries()
    }

    /// Resolve the source a request asked for (or the default one).
    pub fn resolve(&self, source: Option<&str>) -> Result<SourceContext> {
        self.config.resolve_source(source)
    }

    /// Population metrics and per-bucket counts.
    pub async fn status(&self, ctx: &SourceContext) -> Result<DashboardStatus> {
        let mut jobs = JobSet::new();
        add_metric_jobs(&mut jobs, &ctx.target);
        add_census_jobs(&mut jobs, &ctx.target);

        let results = self.run_batch(ctx, jobs).await?;
        let census = self.census(ctx, &results, Utc::now())?;
        status_from(ctx, &results, &census)
    }

    /// One detail view of the fleet.
    pub async fn nodes(&self, ctx: &SourceContext, view: DashboardView) -> Result<DashboardNodes> {
        let mut jobs = JobSet::new();
        add_census_jobs(&mut jobs, &ctx.target);
        self.add_recent_job(&mut jobs, &ctx.target);

        let results = self.run_batch(ctx, jobs).await?;
        let census = self.census(ctx, &results, Utc::now())?;
        nodes_from(ctx, view, &results, census)
    }

    /// Counts and a detail view from a single batch.
    pub async fn dashboard(&self, ctx: &SourceContext, view: DashboardView) -> Result<Dashboard> {
        let mut jobs = JobSet::new();
        add_metric_jobs(&mut jobs, &ctx.target);
        add_census_jobs(&mut jobs, &ctx.target);
        self.add_recent_job(&mut jobs, &ctx.target);

        let results = self.run_batch(ctx, jobs).await?;
        let census = self.census(ctx, &results, Utc::now())?;
        let status = status_from(ctx, &results, &census)?;
        let nodes = nodes_from(ctx, view, &results, census)?;
        Ok(Dashboard { status, nodes })
    }

    /// Counts from server-side status queries instead of local classification.
    ///
    /// With `only`, just the metrics and that view's node query run (a paged
    /// table asking for one list). `search` narrows every node query to
    /// certnames matching the regex. Timestamp mismatch is not available here.
    pub async fn server_counts(
        &self,
        ctx: &SourceContext,
        only: Option<DashboardView>,
        search: Option<&str>,
    ) -> Result<ServerCounts> {
        let now = Utc::now();
        let mut jobs = JobSet::new();
        add_metric_jobs(&mut jobs, &ctx.target);

        let wanted: Vec<&str> = match only {
            None => vec![ALL_NODES, UNREPORTED_NODES, FAILED_NODES, CHANGED_NODES, NOOP_NODES],
            Some(view) => view_job(view).into_iter().collect(),
        };
        for name in wanted {
            let job = status_query_job(ctx, name, now, search);
            jobs.insert(name.to_string(), job);
        }

        let results = self.run_batch(ctx, jobs).await?;
        let total_resource = results.metric(TOT_RESOURCE)?;
        let avg_resource = results.metric(AVG_RESOURCE)?;

        let certnames = |name: &str| -> Result<Option<HashSet<String>>> {
            if results.get(name).is_none() {
                return Ok(None);
            }
            let nodes: Vec<NodeRecord> = decode_records(name, results.records(name)?);
            Ok(Some(nodes.into_iter().map(|n| n.certname).collect()))
        };

        let population = certnames(ALL_NODES)?;
        let unreported = certnames(UNREPORTED_NODES)?;
        let excluding_unreported = |name: &str| -> Result<Option<u64>> {
            Ok(certnames(name)?.map(|ids| match &unreported {
                Some(unreported) => ids.difference(unreported).count() as u64,
                None => ids.len() as u64,
            }))
        };

        let counts = ServerCounts {
            source: ctx.target.name.clone(),
            selected_view: only,
            population: population.map(|ids| ids.len() as u64),
            total_resource,
            avg_resource: format!("{:.2}", avg_resource),
            failed_nodes: excluding_unreported(FAILED_NODES)?,
            changed_nodes: excluding_unreported(CHANGED_NODES)?,
            noop_nodes: excluding_unreported(NOOP_NODES)?,
            unreported_nodes: unreported.as_ref().map(|ids| ids.len() as u64),
        };
        info!(source = %ctx.target.name, view = ?only, "server-side counts computed");
        Ok(counts)
    }

    fn add_recent_job(&self, jobs: &mut JobSet, target: &Arc<SourceTarget>) {
        jobs.insert(
            RECENT_NODES.to_string(),
            JobDescriptor::collection(target.clone(), Endpoint::Nodes)
                .with_paging(Paging::most_recent(self.config.jobs.recent_limit)),
        );
    }

    async fn run_batch(&self, ctx: &SourceContext, jobs: JobSet) -> Result<JobResults> {
        let deadline = self.config.jobs.request_deadline();
        if deadline.is_zero() {
            return Ok(self.runner.run(jobs).await);
        }
        tokio::time::timeout(deadline, self.runner.run(jobs))
            .await
            .map_err(|_| {
                warn!(
                    source = %ctx.target.name,
                    deadline_secs = deadline.as_secs(),
                    "job batch overran deadline"
                );
                CensusError::DeadlineExceeded(deadline.as_secs())
            })
    }

    fn census(
        &self,
        ctx: &SourceContext,
        results: &JobResults,
        now: DateTime<Utc>,
    ) -> Result<Census> {
        let nodes: Vec<NodeRecord> = decode_records(ALL_NODES, results.records(ALL_NODES)?);
        let reports = reports_by_certname(decode_records(REPORTS, results.records(REPORTS)?));
        let events = events_by_certname(decode_records::<EventCountEntry>(
            EVENT_COUNTS,
            results.records(EVENT_COUNTS)?,
        ));

        let options =
            ClassifyOptions::new(now).with_mismatch(self.config.classifier.check_mismatch);
        let raw = classifier::classify(&nodes, &reports, &events, ctx.run_interval, options);
        let all = classifier::merge_all(&nodes, &reports, &events, options.sort);
        let buckets = classifier::apply_precedence(raw, &all);

        info!(
            source = %ctx.target.name,
            population = nodes.len(),
            classified = buckets.population(),
            failed = buckets.failed.len(),
            changed = buckets.changed.len(),
            unreported = buckets.unreported.len(),
            pending = buckets.pending.len(),
            mismatch = buckets.mismatch.len(),
            "census classified"
        );

        Ok(Census {
            population: nodes.len(),
            buckets,
            reports,
            events,
        })
    }
}

fn add_metric_jobs(jobs: &mut JobSet, target: &Arc<SourceTarget>) {
    jobs.insert(
        TOT_RESOURCE.to_string(),
        JobDescriptor::metric(target.clone(), Metric::NumResources),
    );
    jobs.insert(
        AVG_RESOURCE.to_string(),
        JobDescriptor::metric(target.clone(), Metric::AvgResourcesPerNode),
    );
}

/// Inventory, latest reports and event counts: the classifier's inputs.
fn add_census_jobs(jobs: &mut JobSet, target: &Arc<SourceTarget>) {
    jobs.insert(
        ALL_NODES.to_string(),
        JobDescriptor::collection(target.clone(), Endpoint::Nodes),
    );
    jobs.insert(
        REPORTS.to_string(),
        JobDescriptor::collection(target.clone(), Endpoint::Reports)
            .with_query(Query::latest_active_reports()),
    );
    jobs.insert(
        EVENT_COUNTS.to_string(),
        JobDescriptor::collection(target.clone(), Endpoint::EventCounts)
            .with_query(Query::latest_active_reports())
            .summarize_by("certname"),
    );
}

fn view_job(view: DashboardView) -> Option<&'static str> {
    match view {
        DashboardView::Recent => Some(ALL_NODES),
        DashboardView::Failed => Some(FAILED_NODES),
        DashboardView::Changed => Some(CHANGED_NODES),
        DashboardView::Pending => Some(NOOP_NODES),
        DashboardView::Unreported => Some(UNREPORTED_NODES),
        DashboardView::Mismatch => None,
    }
}

fn status_query_job(
    ctx: &SourceContext,
    name: &str,
    now: DateTime<Utc>,
    search: Option<&str>,
) -> JobDescriptor {
    let filter = match name {
        FAILED_NODES => Some(Query::latest_report_status("failed")),
        CHANGED_NODES => Some(Query::latest_report_status("changed")),
        NOOP_NODES => Some(Query::latest_noop_nodes()),
        UNREPORTED_NODES => Some(Query::unreported_since(ctx.run_interval.cutoff(now))),
        _ => None,
    };
    let search = search.map(Query::certname_matches);
    let query = match (filter, search) {
        (Some(f), Some(s)) => Some(f.and(s)),
        (f, s) => f.or(s),
    };

    let job = JobDescriptor::collection(ctx.target.clone(), Endpoint::Nodes);
    match query {
        Some(q) => job.with_query(q),
        None => job,
    }
}

fn status_from(
    ctx: &SourceContext,
    results: &JobResults,
    census: &Census,
) -> Result<DashboardStatus> {
    let total_resource = results.metric(TOT_RESOURCE)?;
    let avg_resource = results.metric(AVG_RESOURCE)?;
    let b = &census.buckets;

    Ok(DashboardStatus {
        source: ctx.target.name.clone(),
        population: census.population as u64,
        total_resource,
        avg_resource: format!("{:.2}", avg_resource),
        failed_nodes: b.failed.len() as u64,
        changed_nodes: b.changed.len() as u64,
        unreported_nodes: b.unreported.len() as u64,
        mismatching_timestamps: b.mismatch.len() as u64,
        pending_nodes: b.pending.len() as u64,
        unchanged_nodes: b.unchanged.len() as u64,
    })
}

fn nodes_from(
    ctx: &SourceContext,
    view: DashboardView,
    results: &JobResults,
    census: Census,
) -> Result<DashboardNodes> {
    let node_list = match view {
        DashboardView::Recent => {
            let recent: Vec<NodeRecord> =
                decode_records(RECENT_NODES, results.records(RECENT_NODES)?);
            // Already ordered by the server.
            classifier::merge_all(&recent, &census.reports, &census.events, false)
        }
        DashboardView::Failed => census.buckets.failed,
        DashboardView::Unreported => census.buckets.unreported,
        DashboardView::Changed => census.buckets.changed,
        DashboardView::Mismatch => census.buckets.mismatch,
        DashboardView::Pending => census.buckets.pending,
    };

    Ok(DashboardNodes {
        source: ctx.target.name.clone(),
        selected_view: view,
        node_list,
    })
}
