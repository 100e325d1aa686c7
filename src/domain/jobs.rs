//! Job descriptors and the per-batch result map.
//!
//! A descriptor names one remote query: which source, which endpoint, an
//! optional query expression and paging, and what shape the answer has.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CensusError, Result};
use crate::query::Query;

/// Connection parameters of one PuppetDB source. Shared read-only by every
/// job of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTarget {
    pub name: String,
    pub url: String,
    pub api_version: u32,
    pub verify_tls: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

#[cfg(test)]
impl SourceTarget {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            api_version: 4,
            verify_tls: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    NumResources,
    AvgResourcesPerNode,
}

impl Metric {
    fn mbean(self, api_version: u32) -> &'static str {
        match (self, api_version >= 4) {
            (Self::NumResources, true) => "puppetlabs.puppetdb.population:name=num-resources",
            (Self::AvgResourcesPerNode, true) => {
                "puppetlabs.puppetdb.population:name=avg-resources-per-node"
            }
            (Self::NumResources, false) => {
                "puppetlabs.puppetdb.query.population:type=default,name=num-resources"
            }
            (Self::AvgResourcesPerNode, false) => {
                "puppetlabs.puppetdb.query.population:type=default,name=avg-resources-per-node"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Nodes,
    Reports,
    EventCounts,
    Metric(Metric),
}

impl Endpoint {
    /// URL path for this endpoint on a source speaking `api_version`.
    pub fn path(&self, api_version: u32) -> String {
        let entity = match self {
            Self::Nodes => "nodes",
            Self::Reports => "reports",
            Self::EventCounts => "event-counts",
            Self::Metric(metric) => {
                let mbean = metric.mbean(api_version);
                return if api_version >= 4 {
                    format!("/metrics/v1/mbeans/{}", mbean)
                } else {
                    format!("/v{}/metrics/mbean/{}", api_version, mbean)
                };
            }
        };
        if api_version >= 4 {
            format!("/pdb/query/v{}/{}", api_version, entity)
        } else {
            format!("/v{}/{}", api_version, entity)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paging {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<OrderBy>,
}

impl Paging {
    /// The `limit` most recently reported nodes.
    pub fn most_recent(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
            order_by: vec![OrderBy {
                field: "report_timestamp".to_string(),
                order: SortOrder::Desc,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// A JSON array of records.
    Collection,
    /// A scalar metric wrapped in a `Value` field.
    Metric,
}

impl ResultShape {
    /// Check a payload against the shape and unwrap it.
    pub fn extract(self, payload: Value) -> Result<JobOutput> {
        match self {
            Self::Collection => match payload {
                Value::Array(records) => Ok(JobOutput::Records(records)),
                other => Err(CensusError::MalformedPayload(format!(
                    "expected a JSON array, got {}",
                    json_kind(&other)
                ))),
            },
            Self::Metric => unwrap_metric(payload).map(JobOutput::Metric),
        }
    }
}

fn unwrap_metric(payload: Value) -> Result<Value> {
    match payload {
        Value::Object(mut map) => {
            if let Some(value) = map.remove("Value") {
                return Ok(value);
            }
            // Jolokia-style wrapper: {"value": {"Value": ..}} or {"value": 12}
            match map.remove("value") {
                Some(inner @ Value::Object(_)) => unwrap_metric(inner),
                Some(Value::Null) | None => Err(CensusError::MalformedPayload(
                    "metric payload has no 'Value' field".to_string(),
                )),
                Some(scalar) => Ok(scalar),
            }
        }
        other => Err(CensusError::MalformedPayload(format!(
            "expected a metric object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One remote query. Immutable once submitted to the runner.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub target: Arc<SourceTarget>,
    pub endpoint: Endpoint,
    pub query: Option<Query>,
    pub paging: Option<Paging>,
    pub summarize_by: Option<String>,
    pub shape: ResultShape,
}

impl JobDescriptor {
    pub fn collection(target: Arc<SourceTarget>, endpoint: Endpoint) -> Self {
        Self {
            target,
            endpoint,
            query: None,
            paging: None,
            summarize_by: None,
            shape: ResultShape::Collection,
        }
    }

    pub fn metric(target: Arc<SourceTarget>, metric: Metric) -> Self {
        Self {
            target,
            endpoint: Endpoint::Metric(metric),
            query: None,
            paging: None,
            summarize_by: None,
            shape: ResultShape::Metric,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    pub fn summarize_by(mut self, field: &str) -> Self {
        self.summarize_by = Some(field.to_string());
        self
    }

    pub fn path(&self) -> String {
        self.endpoint.path(self.target.api_version)
    }
}

/// Jobs of one batch, keyed by caller-chosen name.
pub type JobSet = BTreeMap<String, JobDescriptor>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum JobOutput {
    Records(Vec<Value>),
    Metric(Value),
}

/// Per-job entry of the result map: the parsed payload or a failure marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed { output: JobOutput },
    Failed { error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobResults(HashMap<String, JobOutcome>);

impl JobResults {
    pub fn insert(&mut self, name: String, outcome: JobOutcome) {
        self.0.insert(name, outcome);
    }

    pub fn get(&self, name: &str) -> Option<&JobOutcome> {
        self.0.get(name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of the jobs that ended in a failure marker.
    pub fn failed_jobs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .0
            .iter()
            .filter(|(_, outcome)| matches!(outcome, JobOutcome::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn output(&self, name: &str) -> Result<&JobOutput> {
        match self.0.get(name) {
            Some(JobOutcome::Completed { output }) => Ok(output),
            Some(JobOutcome::Failed { error }) => Err(CensusError::missing(name, error.clone())),
            None => Err(CensusError::missing(name, "job was not part of the batch")),
        }
    }

    /// Records of a required collection job.
    pub fn records(&self, name: &str) -> Result<&[Value]> {
        match self.output(name)? {
            JobOutput::Records(records) => Ok(records),
            JobOutput::Metric(_) => {
                Err(CensusError::missing(name, "expected records, got a metric"))
            }
        }
    }

    /// Value of a required metric job.
    pub fn metric(&self, name: &str) -> Result<f64> {
        match self.output(name)? {
            JobOutput::Metric(value) => value.as_f64().ok_or_else(|| {
                CensusError::missing(name, format!("metric is not numeric: {}", value))
            }),
            JobOutput::Records(_) => {
                Err(CensusError::missing(name, "expected a metric, got records"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_paths_by_api_version() {
        assert_eq!(Endpoint::Nodes.path(4), "/pdb/query/v4/nodes");
        assert_eq!(Endpoint::EventCounts.path(4), "/pdb/query/v4/event-counts");
        assert_eq!(Endpoint::Reports.path(3), "/v3/reports");
        assert_eq!(
            Endpoint::Metric(Metric::NumResources).path(4),
            "/metrics/v1/mbeans/puppetlabs.puppetdb.population:name=num-resources"
        );
        assert_eq!(
            Endpoint::Metric(Metric::AvgResourcesPerNode).path(3),
            "/v3/metrics/mbean/puppetlabs.puppetdb.query.population:type=default,name=avg-resources-per-node"
        );
    }

    #[test]
    fn test_metric_shape_unwraps_value_field() {
        let out = ResultShape::Metric.extract(json!({"Value": 1234})).unwrap();
        assert_eq!(out, JobOutput::Metric(json!(1234)));

        let wrapped = ResultShape::Metric
            .extract(json!({"request": {}, "value": {"Value": 12.5}}))
            .unwrap();
        assert_eq!(wrapped, JobOutput::Metric(json!(12.5)));
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        assert!(matches!(
            ResultShape::Collection.extract(json!({"error": "nope"})),
            Err(CensusError::MalformedPayload(_))
        ));
        assert!(matches!(
            ResultShape::Metric.extract(json!([1, 2])),
            Err(CensusError::MalformedPayload(_))
        ));
        assert!(matches!(
            ResultShape::Metric.extract(json!({"other": 1})),
            Err(CensusError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_and_failed_jobs_are_missing_required_results() {
        let mut results = JobResults::default();
        results.insert(
            "reports".into(),
            JobOutcome::Failed {
                error: "connection refused".into(),
            },
        );
        results.insert(
            "all_nodes".into(),
            JobOutcome::Completed {
                output: JobOutput::Records(vec![json!({"certname": "a"})]),
            },
        );

        assert_eq!(results.records("all_nodes").unwrap().len(), 1);
        assert!(matches!(
            results.records("reports"),
            Err(CensusError::MissingRequiredResult { .. })
        ));
        assert!(matches!(
            results.records("event_counts"),
            Err(CensusError::MissingRequiredResult { .. })
        ));
        assert!(results.metric("all_nodes").is_err());
        assert_eq!(results.failed_jobs(), vec!["reports"]);
    }
}
