//! PuppetDB transport: performs the HTTP side of a job.
//!
//! One reqwest `Client` is built per source (TLS verification mode, CA bundle
//! and client identity differ between sources) and reused for every job that
//! targets it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::domain::dashboard::DashboardService;
use crate::domain::job_runner::Transport;
use crate::domain::jobs::{JobDescriptor, SourceTarget};
use crate::error::{CensusError, Result};

pub struct PuppetDbTransport {
    clients: RwLock<HashMap<String, Client>>,
    request_timeout: Duration,
}

impl PuppetDbTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            request_timeout,
        }
    }

    async fn client_for(&self, target: &SourceTarget) -> Result<Client> {
        if let Some(client) = self.clients.read().await.get(&target.name) {
            return Ok(client.clone());
        }

        let client = build_client(target, self.request_timeout).await?;
        debug!(source = %target.name, verify_tls = target.verify_tls, "built HTTP client");
        self.clients
            .write()
            .await
            .insert(target.name.clone(), client.clone());
        Ok(client)
    }
}

async fn build_client(target: &SourceTarget, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!target.verify_tls);

    if let Some(ca) = &target.ca_cert {
        let pem = read_pem(ca).await?;
        let cert = Certificate::from_pem(&pem).map_err(|e| {
            CensusError::Configuration(format!("invalid CA certificate {}: {}", ca.display(), e))
        })?;
        builder = builder.add_root_certificate(cert);
    }

    match (&target.client_cert, &target.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = read_pem(cert).await?;
            pem.extend(read_pem(key).await?);
            let identity = Identity::from_pem(&pem).map_err(|e| {
                CensusError::Configuration(format!(
                    "invalid client certificate {}: {}",
                    cert.display(),
                    e
                ))
            })?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(CensusError::Configuration(format!(
                "source '{}' needs both client_cert and client_key",
                target.name
            )))
        }
    }

    builder
        .build()
        .map_err(|e| CensusError::Configuration(format!("building HTTP client: {}", e)))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| CensusError::Configuration(format!("reading {}: {}", path.display(), e)))
}

/// Query-string parameters for a job. Older API versions use dashed names.
fn query_params(job: &JobDescriptor) -> Vec<(&'static str, String)> {
    let modern = job.target.api_version >= 4;
    let mut params = Vec::new();

    if let Some(query) = &job.query {
        params.push(("query", query.render()));
    }
    if let Some(paging) = &job.paging {
        if let Some(limit) = paging.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = paging.offset {
            params.push(("offset", offset.to_string()));
        }
        if !paging.order_by.is_empty() {
            let order = serde_json::to_string(&paging.order_by).unwrap_or_default();
            params.push((if modern { "order_by" } else { "order-by" }, order));
        }
    }
    if let Some(field) = &job.summarize_by {
        params.push((if modern { "summarize_by" } else { "summarize-by" }, field.clone()));
    }
    params
}

#[async_trait]
impl Transport for PuppetDbTransport {
    async fn fetch(&self, job: &JobDescriptor) -> Result<Value> {
        let client = self.client_for(&job.target).await?;
        let url = format!("{}{}", job.target.url, job.path());

        let resp = client
            .get(&url)
            .query(&query_params(job))
            .send()
            .await
            .map_err(|e| CensusError::Transport(format!("GET {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CensusError::Transport(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        resp.json().await.map_err(|e| {
            CensusError::MalformedPayload(format!("parsing response from {}: {}", url, e))
        })
    }
}

/// Dashboard service backed by live PuppetDB sources.
pub fn dashboard_service(config: Arc<Config>) -> DashboardService {
    let transport = Arc::new(PuppetDbTransport::new(config.jobs.job_timeout()));
    DashboardService::new(config, transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::{Endpoint, Metric, Paging};
    use crate::query::Query;
    use httpmock::prelude::*;
    use serde_json::json;

    fn target(url: &str) -> Arc<SourceTarget> {
        Arc::new(SourceTarget::new("test", url))
    }

    #[tokio::test]
    async fn test_fetch_sends_query_and_paging() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/pdb/query/v4/nodes")
                    .query_param("limit", "25")
                    .query_param(
                        "order_by",
                        r#"[{"field":"report_timestamp","order":"desc"}]"#,
                    )
                    .query_param("query", Query::active_nodes().render());
                then.status(200)
                    .json_body(json!([{"certname": "a.example.com"}]));
            })
            .await;

        let job = JobDescriptor::collection(target(&server.base_url()), Endpoint::Nodes)
            .with_query(Query::active_nodes())
            .with_paging(Paging::most_recent(25));
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        let body = transport.fetch(&job).await.unwrap();
        mock.assert_async().await;
        assert_eq!(body, json!([{"certname": "a.example.com"}]));
    }

    #[tokio::test]
    async fn test_fetch_metric_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/metrics/v1/mbeans/puppetlabs.puppetdb.population:name=num-resources");
                then.status(200).json_body(json!({"Value": 4200}));
            })
            .await;

        let job = JobDescriptor::metric(target(&server.base_url()), Metric::NumResources);
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        assert_eq!(transport.fetch(&job).await.unwrap(), json!({"Value": 4200}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_summarize_by_uses_dashed_name_on_v3() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v3/event-counts")
                    .query_param("summarize-by", "certname");
                then.status(200).json_body(json!([]));
            })
            .await;

        let mut t = SourceTarget::new("old", &server.base_url());
        t.api_version = 3;
        let job = JobDescriptor::collection(Arc::new(t), Endpoint::EventCounts)
            .summarize_by("certname");
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        transport.fetch(&job).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pdb/query/v4/reports");
                then.status(500).body("boom");
            })
            .await;

        let job = JobDescriptor::collection(target(&server.base_url()), Endpoint::Reports);
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        let err = transport.fetch(&job).await.unwrap_err();
        assert!(matches!(err, CensusError::Transport(_)));
        assert!(err.to_string().contains("500"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pdb/query/v4/nodes");
                then.status(200).body("<html>not json</html>");
            })
            .await;

        let job = JobDescriptor::collection(target(&server.base_url()), Endpoint::Nodes);
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        assert!(matches!(
            transport.fetch(&job).await,
            Err(CensusError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ca_file_is_configuration_error() {
        let mut t = SourceTarget::new("tls", "https://puppetdb.invalid:8081");
        t.ca_cert = Some("/nonexistent/ca.pem".into());
        let job = JobDescriptor::collection(Arc::new(t), Endpoint::Nodes);
        let transport = PuppetDbTransport::new(Duration::from_secs(5));

        assert!(matches!(
            transport.fetch(&job).await,
            Err(CensusError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_client_cert_without_key_is_rejected() {
        let mut t = SourceTarget::new("tls", "https://puppetdb.invalid:8081");
        t.client_cert = Some("/etc/census/cert.pem".into());
        assert!(matches!(
            build_client(&t, Duration::from_secs(1)).await,
            Err(CensusError::Configuration(_))
        ));
    }

    #[test]
    fn test_query_params_order() {
        let job = JobDescriptor::collection(target("http://x"), Endpoint::EventCounts)
            .with_query(Query::latest_active_reports())
            .summarize_by("certname");
        let params = query_params(&job);
        assert_eq!(params[0].0, "query");
        assert_eq!(params[1], ("summarize_by", "certname".to_string()));
    }
}
