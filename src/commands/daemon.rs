use anyhow::Result;

pub fn run(
    http_addr: Option<String>,
    log_level: Option<String>,
    config_path: Option<&str>,
) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    // CLI flags override config values
    if let Some(addr) = http_addr {
        config.daemon.http_addr = addr;
    }
    if let Some(level) = log_level {
        config.daemon.log_level = level;
    }

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(config))
}
