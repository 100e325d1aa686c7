//! Job runner: fans a batch of independent remote queries out to tokio
//! tasks and joins them into one result map.
//!
//! Every job runs exactly once under its own timeout. A job that fails (network,
//! non-2xx, timeout, wrong payload shape, even a panic) becomes a failure marker
//! under its name; siblings are never cancelled. A batch abandoned by its
//! caller aborts every job it still has in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::jobs::{JobDescriptor, JobOutcome, JobResults, JobSet};
use crate::error::{CensusError, Result};

/// Remote query transport: performs one request and returns parsed JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, job: &JobDescriptor) -> Result<Value>;
}

pub struct JobRunner {
    transport: Arc<dyn Transport>,
    job_timeout: Duration,
}

impl JobRunner {
    pub fn new(transport: Arc<dyn Transport>, job_timeout: Duration) -> Self {
        Self {
            transport,
            job_timeout,
        }
    }

    /// Run all jobs concurrently and wait for every one of them.
    ///
    /// Dropping the returned future aborts the jobs still in flight.
    pub async fn run(&self, jobs: JobSet) -> JobResults {
        let started = Instant::now();
        let total = jobs.len();

        // Each task owns its name and writes nothing shared; results are
        // merged as tasks finish.
        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(total);
        for (name, job) in jobs {
            let transport = self.transport.clone();
            let timeout = self.job_timeout;
            let task_name = name.clone();
            let handle = tasks.spawn(async move {
                let outcome = run_one(transport.as_ref(), &task_name, &job, timeout).await;
                (task_name, outcome)
            });
            names.insert(handle.id(), name);
        }

        let mut results = JobResults::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (name, outcome))) => results.insert(name, outcome),
                Err(e) => {
                    let Some(name) = names.remove(&e.id()) else {
                        continue;
                    };
                    warn!(job = %name, error = %e, "job task did not complete");
                    results.insert(
                        name,
                        JobOutcome::Failed {
                            error: format!("job task aborted: {}", e),
                        },
                    );
                }
            }
        }

        debug!(
            jobs = total,
            failed = results.failed_jobs().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job batch finished"
        );
        results
    }
}

async fn run_one(
    transport: &dyn Transport,
    name: &str,
    job: &JobDescriptor,
    timeout: Duration,
) -> JobOutcome {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, transport.fetch(job)).await {
        Ok(fetched) => fetched.and_then(|payload| job.shape.extract(payload)),
        Err(_) => Err(CensusError::Timeout(timeout.as_secs())),
    };

    match result {
        Ok(output) => {
            debug!(
                job = name,
                source = %job.target.name,
                path = %job.path(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job completed"
            );
            JobOutcome::Completed { output }
        }
        Err(e) => {
            if e.is_job_local() {
                warn!(
                    job = name,
                    source = %job.target.name,
                    path = %job.path(),
                    error = %e,
                    "job failed"
                );
            } else {
                // Not a remote failure: the source itself is misconfigured.
                error!(job = name, source = %job.target.name, error = %e, "job could not start");
            }
            JobOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}
