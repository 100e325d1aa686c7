mod api;
mod commands;
mod config;
mod domain;
mod error;
mod puppetdb;
mod query;
mod server;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "census",
    version,
    about = "Fleet status census for PuppetDB: failed, changed, unreported and pending nodes"
)]
struct Cli {
    /// Path to config file (default: ~/.config/census/config.yaml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the census daemon (REST + GraphQL)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Population metrics and per-status node counts
    Status {
        /// Configured source to query (defaults to default_source)
        #[arg(long)]
        source: Option<String>,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List the nodes of one status view
    Nodes {
        #[arg(long)]
        source: Option<String>,

        /// recent, failed, unreported, changed, mismatch or pending
        #[arg(long)]
        show: Option<String>,

        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Counts computed by server-side status queries
    Counts {
        #[arg(long)]
        source: Option<String>,

        /// Only run the query behind this view
        #[arg(long)]
        only: Option<String>,

        /// Regex on certname applied to every node query
        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List configured PuppetDB sources
    Sources {
        #[arg(long, default_value = "table")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
        } => commands::daemon::run(http_addr, log_level, config),
        Commands::Status { source, format } => {
            commands::init_logging();
            commands::status::run(config, source.as_deref(), &format)
        }
        Commands::Nodes {
            source,
            show,
            format,
        } => {
            commands::init_logging();
            commands::nodes::run(config, source.as_deref(), show.as_deref(), &format)
        }
        Commands::Counts {
            source,
            only,
            search,
            format,
        } => {
            commands::init_logging();
            commands::counts::run(
                config,
                source.as_deref(),
                only.as_deref(),
                search.as_deref(),
                &format,
            )
        }
        Commands::Sources { format } => commands::sources::run(config, &format),
    }
}
