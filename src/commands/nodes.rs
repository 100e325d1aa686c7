//! `census nodes --show <view>`: one node list.

use std::sync::Arc;

use anyhow::Result;

use super::output;
use crate::config::Config;
use crate::domain::types::DashboardView;
use crate::puppetdb;

pub fn run(
    config_path: Option<&str>,
    source: Option<&str>,
    show: Option<&str>,
    format: &str,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config, source, DashboardView::parse(show), format))
}

async fn run_async(
    config: Config,
    source: Option<&str>,
    view: DashboardView,
    format: &str,
) -> Result<()> {
    let service = puppetdb::dashboard_service(Arc::new(config));
    let ctx = service.resolve(source)?;
    let nodes = service.nodes(&ctx, view).await?;
    output::print_nodes(format, &nodes)
}
