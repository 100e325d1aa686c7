//! `census status`: population metrics and bucket counts for one source.

use std::sync::Arc;

use anyhow::Result;

use super::output;
use crate::config::Config;
use crate::puppetdb;

pub fn run(config_path: Option<&str>, source: Option<&str>, format: &str) -> Result<()> {
    let config = super::load_config(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config, source, format))
}

async fn run_async(config: Config, source: Option<&str>, format: &str) -> Result<()> {
    let service = puppetdb::dashboard_service(Arc::new(config));
    let ctx = service.resolve(source)?;
    let status = service.status(&ctx).await?;
    output::print_status(format, &status)
}
