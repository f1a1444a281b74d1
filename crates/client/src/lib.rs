//! Network side of metacrawl.
//!
//! This crate provides the HTTP fetch pipeline (robots.txt gate, rate
//! limiting, retries), sitemap parsing and the platform indexers shared by
//! the CLI.

pub mod fetch;
pub mod indexer;
pub mod sitemap;

pub use fetch::{FetchClient, FetchConfig, FetchError, FetchResponse, RequestOptions, RobotsPolicyCache};
pub use indexer::{IndexContext, IndexError, IndexRunner, Indexer, IndexerRegistry, Platform, RunReport, Services};
