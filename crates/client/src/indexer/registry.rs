//! Known platforms and dispatch to their indexers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use metacrawl_core::IndexerConfig;

use super::decentraland::DecentralandIndexer;
use super::neos::NeosIndexer;
use super::runner::{IndexRunner, RunReport};
use super::sandbox::SandboxIndexer;
use super::spatial::SpatialIndexer;
use super::{IndexContext, IndexError, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Decentraland,
    Sandbox,
    Spatial,
    Neos,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::Decentraland, Platform::Sandbox, Platform::Spatial, Platform::Neos];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Decentraland => "decentraland",
            Platform::Sandbox => "sandbox",
            Platform::Spatial => "spatial",
            Platform::Neos => "neos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

/// Platform discovery and indexer dispatch.
#[derive(Clone)]
pub struct IndexerRegistry {
    services: Services,
}

impl IndexerRegistry {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn all(&self) -> &'static [Platform] {
        &Platform::ALL
    }

    /// Resolved settings for `platform`.
    pub fn config_for(&self, platform: Platform) -> IndexerConfig {
        self.services.config.indexer(platform.as_str())
    }

    pub fn is_enabled(&self, platform: Platform) -> bool {
        self.config_for(platform).enabled
    }

    pub fn enabled(&self) -> Vec<Platform> {
        Platform::ALL.into_iter().filter(|p| self.is_enabled(*p)).collect()
    }

    /// Run the indexer for `platform` with its configured settings, adjusted
    /// by `overrides`.
    pub async fn run(
        &self,
        platform: Platform,
        overrides: impl FnOnce(&mut IndexerConfig),
    ) -> Result<RunReport, IndexError> {
        let mut config = self.config_for(platform);
        overrides(&mut config);
        config
            .validate(platform.as_str())
            .map_err(|e| IndexError::Config(e.to_string()))?;

        let ctx = IndexContext::new(self.services.clone(), platform, config);
        match platform {
            Platform::Decentraland => IndexRunner::run(&DecentralandIndexer, &ctx).await,
            Platform::Sandbox => IndexRunner::run(&SandboxIndexer, &ctx).await,
            Platform::Spatial => IndexRunner::run(&SpatialIndexer, &ctx).await,
            Platform::Neos => IndexRunner::run(&NeosIndexer, &ctx).await,
        }
    }
}
