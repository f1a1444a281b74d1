//! metacrawl command line.
//!
//! Runs platform indexers and inspects what they stored. Results are
//! printed to stdout as JSON lines; logging goes to stderr.
//!
//! Configuration comes from `--config` (or `METACRAWL_CONFIG_FILE`) plus
//! `METACRAWL_*` environment variables. Commands that touch the verified
//! cache need `METACRAWL_SECRET_KEY_BASE`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use metacrawl_client::Platform;

mod commands;

#[derive(Parser)]
#[command(name = "metacrawl", version, about = "Index public metaverse platforms into a local catalogue")]
struct Cli {
    /// TOML configuration file. Overrides `METACRAWL_CONFIG_FILE`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run indexers. Without platforms or `--all`, runs the enabled ones.
    Index {
        platforms: Vec<Platform>,

        /// Run every known platform, enabled or not.
        #[arg(long, conflicts_with = "platforms")]
        all: bool,

        #[command(flatten)]
        overrides: commands::Overrides,
    },

    /// Check whether robots.txt allows crawling a URL.
    Robots { url: String },

    /// List platforms and whether they are enabled.
    Platforms,

    /// Show recent indexing runs, newest first.
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print stored content.
    Content {
        #[arg(long)]
        platform: Option<Platform>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Manage the verified cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete cache entries. Without flags, everything is removed.
    Purge {
        /// Only entries past their expiry, plus old coordinate scan records.
        #[arg(long, conflicts_with = "domain")]
        expired: bool,

        /// Only entries bound to this domain.
        #[arg(long)]
        domain: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { platforms, all, overrides } => commands::index(config, platforms, all, &overrides).await,
        Commands::Robots { url } => commands::robots(config, &url).await,
        Commands::Platforms => commands::platforms(&config),
        Commands::Runs { limit } => commands::runs(&config, limit).await,
        Commands::Content { platform, limit } => commands::content(&config, platform, limit).await,
        Commands::Cache { action: CacheAction::Purge { expired, domain } } => {
            commands::purge_cache(&config, expired, domain.as_deref()).await
        }
    }
}
