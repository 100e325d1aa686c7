pub mod counts;
pub mod daemon;
pub mod nodes;
pub mod output;
pub mod sources;
pub mod status;

use std::path::Path;

use anyhow::Result;

use crate::config::{self, Config};

/// Config from `--config` when given, else the default location.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => config::load_from(Path::new(path)),
        None => config::load(),
    }
}

/// Compact stderr logging for one-shot commands; stdout stays clean for output.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
