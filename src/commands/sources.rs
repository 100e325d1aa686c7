use anyhow::Result;
use colored::Colorize;

use super::output;

pub fn run(config_path: Option<&str>, format: &str) -> Result<()> {
    let config = super::load_config(config_path)?;
    let sources = config.source_summaries();

    if format == "json" {
        return output::print_output(format, &sources);
    }

    if sources.is_empty() {
        println!("{} No sources configured", "::".blue().bold());
        println!("   Add one under `sources` in {}", crate::config::Config::path()?.display());
        return Ok(());
    }

    for s in &sources {
        let marker = if s.is_default { "*".green().bold() } else { " ".normal() };
        println!(
            "{} {} {} (api v{}, run interval {}m{})",
            marker,
            s.name.bold(),
            s.url.dimmed(),
            s.api_version,
            s.run_time_minutes,
            if s.verify_tls { "" } else { ", TLS unverified" }
        );
    }
    Ok(())
}
