//! Subcommand handlers.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use serde_json::json;
use std::path::Path;

use metacrawl_client::fetch::canonicalize;
use metacrawl_client::{IndexerRegistry, Platform, Services};
use metacrawl_core::{AppConfig, Db, IndexerConfig};

/// Per-run adjustments to the configured indexer settings.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    #[arg(long)]
    pub max_items: Option<usize>,

    #[arg(long)]
    pub search_radius: Option<u32>,

    #[arg(long)]
    pub daily_coordinate_limit: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut IndexerConfig) {
        if let Some(max_items) = self.max_items {
            config.max_items = Some(max_items);
        }
        if let Some(radius) = self.search_radius {
            config.search_radius = radius;
        }
        if let Some(limit) = self.daily_coordinate_limit {
            config.daily_coordinate_limit = limit;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(Some(path)),
        None => AppConfig::load(),
    };
    config.context("failed to load configuration")
}

pub async fn index(config: AppConfig, platforms: Vec<Platform>, all: bool, overrides: &Overrides) -> Result<()> {
    let registry = IndexerRegistry::new(Services::build(config).await?);

    let targets = if all {
        Platform::ALL.to_vec()
    } else if platforms.is_empty() {
        registry.enabled()
    } else {
        platforms
    };

    if targets.is_empty() {
        tracing::warn!("no platforms enabled, nothing to index");
        return Ok(());
    }

    let mut failed = Vec::new();
    for platform in targets {
        if !registry.is_enabled(platform) {
            tracing::info!(platform = %platform, "running platform that is disabled in configuration");
        }
        match registry.run(platform, |c| overrides.apply(c)).await {
            Ok(report) => print_json(&report)?,
            Err(e) => {
                tracing::error!(platform = %platform, error = %e, "indexer failed");
                failed.push(platform.as_str());
            }
        }
    }

    if !failed.is_empty() {
        bail!("indexing failed for: {}", failed.join(", "));
    }
    Ok(())
}

pub async fn robots(config: AppConfig, url: &str) -> Result<()> {
    let services = Services::build(config).await?;
    let url = canonicalize(url)?;
    let robots = services.fetch.robots().context("robots policy cache is not configured")?;

    let policy = robots.policy_for(&url).await?;
    print_json(&json!({
        "url": url.as_str(),
        "domain": policy.domain(),
        "user_agent": robots.user_agent(),
        "allowed": policy.allows(robots.user_agent(), &url),
        "source": format!("{:?}", policy.source()).to_lowercase(),
    }))
}

pub fn platforms(config: &AppConfig) -> Result<()> {
    for platform in Platform::ALL {
        let settings = config.indexer(platform.as_str());
        print_json(&json!({
            "platform": platform,
            "enabled": settings.enabled,
            "api_endpoint": settings.api_endpoint,
            "max_items": settings.max_items,
        }))?;
    }
    Ok(())
}

pub async fn runs(config: &AppConfig, limit: usize) -> Result<()> {
    let db = Db::open(&config.db_path).await?;
    for run in db.recent_runs(limit).await? {
        let mut value = serde_json::to_value(&run)?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("success_rate".into(), json!(run.success_rate()));
            fields.insert("duration".into(), json!(run.duration_formatted()));
        }
        print_json(&value)?;
    }
    Ok(())
}

pub async fn content(config: &AppConfig, platform: Option<Platform>, limit: usize) -> Result<()> {
    let db = Db::open(&config.db_path).await?;
    for row in db.list_content(platform.map(|p| p.as_str()), limit).await? {
        print_json(&row)?;
    }
    Ok(())
}

pub async fn purge_cache(config: &AppConfig, expired: bool, domain: Option<&str>) -> Result<()> {
    let db = Db::open(&config.db_path).await?;
    let removed = purge(&db, expired, domain).await?;
    print_json(&json!({ "removed": removed }))
}

async fn purge(db: &Db, expired: bool, domain: Option<&str>) -> Result<u64> {
    let removed = match domain {
        Some(domain) => db.purge_entries_by_domain(domain).await?,
        None if expired => {
            let pruned = db.prune_coordinate_scans(Utc::now().date_naive()).await?;
            tracing::info!(pruned, "pruned coordinate scans from previous days");
            db.purge_expired_entries().await?
        }
        None => db.purge_all_entries().await?,
    };
    tracing::info!(removed, "purged cache entries");
    Ok(removed)
}
