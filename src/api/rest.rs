use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::dashboard::DashboardService;
use crate::domain::types::*;
use crate::error::CensusError;

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<DashboardService>,
}

/// Query-string parameters shared by the dashboard routes.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub source: Option<String>,
    pub show: Option<String>,
    pub only: Option<String>,
    pub search: Option<String>,
}

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sources", get(sources))
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/dashboard/status", get(status))
        .route("/api/v1/dashboard/nodes", get(nodes))
        .route("/api/v1/dashboard/counts", get(counts))
        .with_state(state)
}

/// Map a fatal census error to an HTTP status.
fn api_error(e: CensusError) -> ApiError {
    let status = match &e {
        CensusError::Configuration(_) | CensusError::UnknownSource { .. } => {
            StatusCode::BAD_REQUEST
        }
        CensusError::MissingRequiredResult { .. } => StatusCode::BAD_GATEWAY,
        CensusError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health(State(state): State<AppState>) -> Json<DaemonHealth> {
    Json(state.dashboard.health())
}

async fn sources(State(state): State<AppState>) -> Json<Vec<SourceSummary>> {
    Json(state.dashboard.sources())
}

async fn status(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardStatus>, ApiError> {
    let ctx = state.dashboard.resolve(params.source.as_deref()).map_err(api_error)?;
    state.dashboard.status(&ctx).await.map(Json).map_err(api_error)
}

async fn nodes(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardNodes>, ApiError> {
    let ctx = state.dashboard.resolve(params.source.as_deref()).map_err(api_error)?;
    let view = DashboardView::parse(params.show.as_deref());
    state.dashboard.nodes(&ctx, view).await.map(Json).map_err(api_error)
}

async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<Dashboard>, ApiError> {
    let ctx = state.dashboard.resolve(params.source.as_deref()).map_err(api_error)?;
    let view = DashboardView::parse(params.show.as_deref());
    state
        .dashboard
        .dashboard(&ctx, view)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn counts(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<ServerCounts>, ApiError> {
    let ctx = state.dashboard.resolve(params.source.as_deref()).map_err(api_error)?;
    let only = params.only.as_deref().map(|v| DashboardView::parse(Some(v)));
    state
        .dashboard
        .server_counts(&ctx, only, params.search.as_deref())
        .await
        .map(Json)
        .map_err(api_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SourceConfig};
    use crate::domain::job_runner::Transport;
    use crate::domain::jobs::JobDescriptor;
    use async_trait::async_trait;
    use serde_json::Value;

    /// Every request fails as if PuppetDB were down.
    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn fetch(&self, _job: &JobDescriptor) -> crate::error::Result<Value> {
            Err(CensusError::Transport("connection refused".into()))
        }
    }

    fn state() -> AppState {
        let mut config = Config::default();
        config.default_source = Some("prod".into());
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
        AppState {
            dashboard: Arc::new(DashboardService::new(Arc::new(config), Arc::new(Unreachable))),
        }
    }

    fn params(source: Option<&str>) -> Query<DashboardParams> {
        Query(DashboardParams {
            source: source.map(str::to_string),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_health_and_sources() {
        let Json(health) = health(State(state())).await;
        assert_eq!(health.sources, 1);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));

        let Json(list) = sources(State(state())).await;
        assert_eq!(list.len(), 1);
        assert!(list[0].is_default);
    }

    #[tokio::test]
    async fn test_unknown_source_is_bad_request() {
        let (code, message) = status(State(state()), params(Some("staging")))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(message.contains("staging"));
    }

    #[tokio::test]
    async fn test_failed_upstream_is_bad_gateway() {
        let (code, message) = nodes(State(state()), params(None)).await.unwrap_err();
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert!(message.contains("required result"), "got: {}", message);
    }

    #[test]
    fn test_deadline_maps_to_gateway_timeout() {
        let (code, _) = api_error(CensusError::DeadlineExceeded(60));
        assert_eq!(code, StatusCode::GATEWAY_TIMEOUT);
    }
}
