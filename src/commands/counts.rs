//! `census counts`: counts from server-side status queries.

use std::sync::Arc;

use anyhow::Result;

use super::output;
use crate::config::Config;
use crate::domain::types::DashboardView;
use crate::puppetdb;

pub fn run(
    config_path: Option<&str>,
    source: Option<&str>,
    only: Option<&str>,
    search: Option<&str>,
    format: &str,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let only = only.map(|v| DashboardView::parse(Some(v)));
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config, source, only, search, format))
}

async fn run_async(
    config: Config,
    source: Option<&str>,
    only: Option<DashboardView>,
    search: Option<&str>,
    format: &str,
) -> Result<()> {
    let service = puppetdb::dashboard_service(Arc::new(config));
    let ctx = service.resolve(source)?;
    let counts = service.server_counts(&ctx, only, search).await?;
    output::print_output(format, &counts)
}
