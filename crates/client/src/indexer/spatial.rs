//! Spatial.io spaces from the site's root sitemap.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use metacrawl_core::IndexedContent;

use super::{IndexContext, IndexError, Indexer, Platform};
use crate::fetch::RequestOptions;
use crate::sitemap::xml_locs;

pub const DEFAULT_ENDPOINT: &str = "https://www.spatial.io";

const SPACE_PATTERN: &str = r"/s/(.+)-([a-f0-9]+)$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialSpace {
    pub space_id: String,
    /// Slug from the URL, hyphenated.
    pub name: String,
    /// Space URL without its query string.
    pub url: String,
}

/// `gallery-one` becomes `Gallery One`.
pub fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Spaces among the sitemap `urls`, in sitemap order.
pub fn spaces_from_urls(urls: &[String]) -> Result<Vec<SpatialSpace>, IndexError> {
    let pattern = Regex::new(SPACE_PATTERN).map_err(|e| IndexError::Config(e.to_string()))?;

    Ok(urls
        .iter()
        .filter(|url| url.contains("/s/"))
        .filter_map(|url| {
            let base = url.split('?').next().unwrap_or(url);
            let captures = pattern.captures(base)?;
            Some(SpatialSpace { space_id: captures[2].to_string(), name: captures[1].to_string(), url: base.to_string() })
        })
        .collect())
}

pub struct SpatialIndexer;

#[async_trait::async_trait]
impl Indexer for SpatialIndexer {
    type Item = SpatialSpace;

    fn platform(&self) -> Platform {
        Platform::Spatial
    }

    /// Spatial serves no robots.txt.
    fn requires_robots_check(&self) -> bool {
        false
    }

    async fn fetch_items(&self, ctx: &IndexContext) -> Result<Vec<SpatialSpace>, IndexError> {
        let endpoint = ctx.endpoint(DEFAULT_ENDPOINT);
        let domain = ctx.endpoint_domain(&endpoint)?;
        let options = ctx.request_options(RequestOptions::xml(), self.requires_robots_check());
        let url = format!("{endpoint}/root.xml");
        let fetch = ctx.fetch();
        let url_ref = &url;

        let locs: Vec<String> = ctx
            .cached_json(&["sitemap", "root"], &domain, || async move {
                let body = fetch.get_text(url_ref, options).await?;
                Ok(xml_locs(&body)?)
            })
            .await?;

        let spaces = spaces_from_urls(&locs)?;
        tracing::info!(urls = locs.len(), spaces = spaces.len(), "parsed spatial sitemap");
        Ok(spaces)
    }

    fn normalize(&self, space: &SpatialSpace) -> Result<IndexedContent, IndexError> {
        let title = title_from_slug(&space.name);
        if title.is_empty() {
            return Err(IndexError::Normalize(format!("space {} has an empty name", space.space_id)));
        }

        let description = format!("A virtual space on Spatial.io: {title}");

        Ok(IndexedContent {
            source_platform: self.platform().as_str().to_string(),
            external_id: space.space_id.clone(),
            content_type: "space".to_string(),
            title,
            description: Some(description),
            author: None,
            metadata: json!({
                "source_url": space.url,
                "space_id": space.space_id,
                "space_name": space.name,
            }),
            coordinates: None,
        })
    }
}
