use async_graphql::{Context, EmptyMutation, EmptySubscription, Object, Schema};
use std::sync::Arc;

use crate::domain::dashboard::DashboardService;
use crate::domain::types::*;

pub type CensusSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn health(&self, ctx: &Context<'_>) -> async_graphql::Result<DaemonHealth> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        Ok(svc.health())
    }

    /// Configured PuppetDB sources.
    async fn sources(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<SourceSummary>> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        Ok(svc.sources())
    }

    async fn dashboard_status(
        &self,
        ctx: &Context<'_>,
        source: Option<String>,
    ) -> async_graphql::Result<DashboardStatus> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        let source = svc.resolve(source.as_deref())?;
        Ok(svc.status(&source).await?)
    }

    /// Node list for one view; `recent` when no view is given.
    async fn dashboard_nodes(
        &self,
        ctx: &Context<'_>,
        source: Option<String>,
        show: Option<DashboardView>,
    ) -> async_graphql::Result<DashboardNodes> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        let source = svc.resolve(source.as_deref())?;
        Ok(svc.nodes(&source, show.unwrap_or_default()).await?)
    }

    async fn dashboard(
        &self,
        ctx: &Context<'_>,
        source: Option<String>,
        show: Option<DashboardView>,
    ) -> async_graphql::Result<Dashboard> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        let source = svc.resolve(source.as_deref())?;
        Ok(svc.dashboard(&source, show.unwrap_or_default()).await?)
    }

    async fn server_counts(
        &self,
        ctx: &Context<'_>,
        source: Option<String>,
        only: Option<DashboardView>,
        search: Option<String>,
    ) -> async_graphql::Result<ServerCounts> {
        let svc = ctx.data::<Arc<DashboardService>>()?;
        let source = svc.resolve(source.as_deref())?;
        Ok(svc.server_counts(&source, only, search.as_deref()).await?)
    }
}

pub fn build_schema(dashboard: Arc<DashboardService>) -> CensusSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .extension(async_graphql::extensions::Tracing)
        .data(dashboard)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SourceConfig};
    use crate::domain::job_runner::Transport;
    use crate::domain::jobs::{Endpoint, JobDescriptor, Metric};
    use crate::error::{CensusError, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// A fleet of one healthy node.
    struct OneNode;

    #[async_trait]
    impl Transport for OneNode {
        async fn fetch(&self, job: &JobDescriptor) -> Result<Value> {
            match job.endpoint {
                Endpoint::Metric(Metric::NumResources) => Ok(json!({"Value": 10})),
                Endpoint::Metric(Metric::AvgResourcesPerNode) => Ok(json!({"Value": 10.0})),
                Endpoint::Nodes => Ok(json!([{
                    "certname": "web1",
                    "report_timestamp": chrono::Utc::now().to_rfc3339()
                }])),
                Endpoint::Reports => Ok(json!([{"certname": "web1", "status": "unchanged"}])),
                Endpoint::EventCounts => Err(CensusError::Transport("unused".into())),
            }
        }
    }

    fn schema() -> CensusSchema {
        let mut config = Config::default();
        config.sources.insert(
            "prod".into(),
            SourceConfig {
                url: "http://puppetdb:8080".into(),
                api_version: 4,
                verify_tls: true,
                ca_cert: None,
                client_cert: None,
                client_key: None,
                run_time_minutes: 30,
            },
        );
        build_schema(Arc::new(DashboardService::new(Arc::new(config), Arc::new(OneNode))))
    }

    #[tokio::test]
    async fn test_sources_query() {
        let resp = schema()
            .execute("{ sources { name apiVersion runTimeMinutes } }")
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let data = resp.data.into_json().unwrap();
        assert_eq!(data["sources"][0]["name"], "prod");
        assert_eq!(data["sources"][0]["runTimeMinutes"], 30);
    }

    #[tokio::test]
    async fn test_server_counts_query() {
        let resp = schema()
            .execute(r#"{ serverCounts(source: "prod") { population unreportedNodes avgResource } }"#)
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let data = resp.data.into_json().unwrap();
        assert_eq!(data["serverCounts"]["population"], 1);
        assert_eq!(data["serverCounts"]["avgResource"], "10.00");
    }

    #[tokio::test]
    async fn test_missing_event_counts_is_an_error() {
        let resp = schema()
            .execute("{ dashboardStatus { population } }")
            .await;
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].message.contains("event_counts"));
    }

    #[tokio::test]
    async fn test_unknown_source_is_an_error() {
        let resp = schema()
            .execute(r#"{ dashboardNodes(source: "nope", show: FAILED) { selectedView } }"#)
            .await;
        assert!(resp.errors[0].message.contains("unknown source 'nope'"));
    }
}
