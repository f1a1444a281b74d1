//! The Sandbox experiences from the public experience sitemap.
//!
//! The sitemap sits behind bot protection; when it answers with a block or
//! a challenge page the general sitemap is tried instead. Experiences that
//! disappear from the sitemap are removed from the index before a run
//! processes the new list.

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;

use metacrawl_core::IndexedContent;

use super::{IndexContext, IndexError, Indexer, Platform};
use crate::fetch::{FetchError, RequestOptions};
use crate::sitemap::sitemap_urls;

pub const DEFAULT_ENDPOINT: &str = "https://www.sandbox.game";

const EXPERIENCE_PATTERN: &str = r"/experiences/([^/]+)/([a-f0-9-]{36})/page";
const MAX_TITLE_CHARS: usize = 255;
const CHALLENGE_MARKERS: [&str; 4] = ["cf-browser-verification", "challenge-platform", "Just a moment...", "cf_chl_opt"];

/// One experience row from the sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxExperience {
    pub uuid: String,
    /// Title as it appears in the URL.
    pub raw_title: String,
    pub url: String,
    /// 1-based position of the URL in the sitemap.
    pub row_index: usize,
}

/// Whether `body` is a Cloudflare interstitial rather than a sitemap.
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

fn is_bot_block(err: &FetchError) -> bool {
    matches!(err.status(), Some(403 | 503))
}

/// URL path segment to text: `+` is a space, then percent-decoding.
pub fn decode_title(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().trim().to_string()
}

/// Replace leftover `%XX` escapes with spaces, collapse whitespace and cap
/// the length.
pub fn clean_title(title: &str) -> String {
    let bytes = title.as_bytes();
    let mut out = String::with_capacity(title.len());
    let mut i = 0;

    while i < title.len() {
        let escape = bytes[i] == b'%'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
        if escape {
            out.push(' ');
            i += 3;
            continue;
        }
        match title[i..].chars().next() {
            Some(ch) => {
                out.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }

    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// Experiences among `urls`, keeping sitemap order.
pub fn experiences_from_urls(urls: &[String]) -> Result<Vec<SandboxExperience>, IndexError> {
    let pattern = Regex::new(EXPERIENCE_PATTERN).map_err(|e| IndexError::Config(e.to_string()))?;

    Ok(urls
        .iter()
        .enumerate()
        .filter_map(|(index, url)| {
            let captures = pattern.captures(url)?;
            Some(SandboxExperience {
                uuid: captures[2].to_string(),
                raw_title: captures[1].to_string(),
                url: url.clone(),
                row_index: index + 1,
            })
        })
        .collect())
}

pub struct SandboxIndexer;

impl SandboxIndexer {
    /// Body of the general sitemap, or `None` when it cannot be used either.
    async fn fallback_sitemap(&self, ctx: &IndexContext, endpoint: &str, options: RequestOptions) -> Option<String> {
        let url = format!("{endpoint}/sitemap.xml");
        tracing::info!(url = %url, "trying fallback sitemap");

        match ctx.fetch().get_text(&url, options).await {
            Ok(body) if !is_challenge_page(&body) => Some(body),
            Ok(_) => {
                tracing::warn!(url = %url, "fallback sitemap is also behind a challenge page");
                None
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fallback sitemap unavailable");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Indexer for SandboxIndexer {
    type Item = SandboxExperience;

    fn platform(&self) -> Platform {
        Platform::Sandbox
    }

    async fn fetch_items(&self, ctx: &IndexContext) -> Result<Vec<SandboxExperience>, IndexError> {
        let endpoint = ctx.endpoint(DEFAULT_ENDPOINT);
        let options = ctx.request_options(RequestOptions::xml(), self.requires_robots_check());
        let primary = format!("{endpoint}/__sitemap__/experiences.xml");

        let body = match ctx.fetch().get_text(&primary, options).await {
            Ok(body) if !is_challenge_page(&body) => body,
            Ok(_) => {
                tracing::warn!(url = %primary, "experience sitemap returned a challenge page");
                match self.fallback_sitemap(ctx, &endpoint, options).await {
                    Some(body) => body,
                    None => return Ok(Vec::new()),
                }
            }
            Err(e) if is_bot_block(&e) => {
                tracing::warn!(url = %primary, error = %e, "experience sitemap blocked");
                match self.fallback_sitemap(ctx, &endpoint, options).await {
                    Some(body) => body,
                    None => return Ok(Vec::new()),
                }
            }
            Err(FetchError::RobotsDisallowed { url }) => {
                tracing::info!(url = %url, "experience sitemap disallowed by robots.txt");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let urls = sitemap_urls(&body)?;
        let experiences = experiences_from_urls(&urls)?;
        tracing::info!(urls = urls.len(), experiences = experiences.len(), "parsed experience sitemap");
        Ok(experiences)
    }

    async fn before_processing(&self, ctx: &IndexContext, items: &[SandboxExperience]) -> Result<(), IndexError> {
        if items.is_empty() {
            tracing::info!("sitemap listed no experiences, skipping sync");
            return Ok(());
        }

        let platform = ctx.platform.as_str();
        let current: HashSet<&str> = items.iter().map(|e| e.uuid.as_str()).collect();
        let existing = ctx.db().content_ids(platform).await?;

        let stale: Vec<String> = existing
            .iter()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();
        let removed = if stale.is_empty() { 0 } else { ctx.db().remove_content(platform, &stale).await? };
        let new = current.iter().filter(|id| !existing.contains(**id)).count();

        tracing::info!(
            sitemap = current.len(),
            existing = existing.len(),
            new,
            removed,
            "synced experiences with sitemap"
        );
        Ok(())
    }

    fn normalize(&self, item: &SandboxExperience) -> Result<IndexedContent, IndexError> {
        let decoded = decode_title(&item.raw_title);
        let mut title = clean_title(&decoded);
        if title.is_empty() {
            title = format!("Sandbox experience {}", item.uuid);
        }

        Ok(IndexedContent {
            source_platform: self.platform().as_str().to_string(),
            external_id: item.uuid.clone(),
            content_type: "experience".to_string(),
            title,
            description: None,
            author: None,
            metadata: json!({
                "source_url": item.url,
                "sitemap_row": item.row_index,
                "original_title": decoded,
            }),
            coordinates: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{IndexRunner, testing};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UUID_A: &str = "0e2a1b7c-1111-2222-3333-444455556666";
    const UUID_B: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    fn xml_sitemap(urls: &[String]) -> String {
        let entries: String = urls.iter().map(|u| format!("<url><loc>{u}</loc></url>")).collect();
        format!(r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#)
    }

    fn experience_url(title: &str, uuid: &str) -> String {
        format!("https://www.sandbox.game/en/experiences/{title}/{uuid}/page")
    }

    async fn ctx(server: &MockServer) -> IndexContext {
        testing::context(Platform::Sandbox, &server.uri(), |_| {}).await
    }

    #[test]
    fn test_decode_and_clean_title() {
        assert_eq!(decode_title("Alpha+World%21"), "Alpha World!");
        assert_eq!(decode_title("%20%20Caf%C3%A9+Club%20"), "Café Club");
        assert_eq!(clean_title("Broken %2 escape %ZZ and %4F"), "Broken %2 escape %ZZ and");
        assert_eq!(clean_title("  many   spaces\there "), "many spaces here");
        assert_eq!(clean_title(&"x".repeat(300)).chars().count(), 255);
    }

    #[test]
    fn test_experiences_from_urls() {
        let urls = vec![
            "https://www.sandbox.game/en/about".to_string(),
            experience_url("Alpha+World", UUID_A),
            experience_url("Short", "not-a-uuid"),
            experience_url("Beta", UUID_B),
        ];
        let experiences = experiences_from_urls(&urls).unwrap();
        assert_eq!(experiences.len(), 2);
        assert_eq!(experiences[0].uuid, UUID_A);
        assert_eq!(experiences[0].raw_title, "Alpha+World");
        assert_eq!(experiences[0].row_index, 2);
        assert_eq!(experiences[1].row_index, 4);
    }

    #[test]
    fn test_normalize() {
        let item = SandboxExperience {
            uuid: UUID_A.into(),
            raw_title: "Alpha+World%21".into(),
            url: experience_url("Alpha+World%21", UUID_A),
            row_index: 3,
        };
        let content = SandboxIndexer.normalize(&item).unwrap();
        assert_eq!(content.external_id, UUID_A);
        assert_eq!(content.content_type, "experience");
        assert_eq!(content.title, "Alpha World!");
        assert_eq!(content.metadata["sitemap_row"], 3);
        assert_eq!(content.metadata["original_title"], "Alpha World!");

        let untitled = SandboxExperience { raw_title: "%20".into(), ..item };
        assert_eq!(SandboxIndexer.normalize(&untitled).unwrap().title, format!("Sandbox experience {UUID_A}"));
    }

    #[test]
    fn test_challenge_detection() {
        assert!(is_challenge_page("<html><title>Just a moment...</title></html>"));
        assert!(is_challenge_page("<script>window._cf_chl_opt={}</script>"));
        assert!(!is_challenge_page("<urlset></urlset>"));
    }

    #[tokio::test]
    async fn test_fetch_primary_sitemap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml_sitemap(&[
                experience_url("Alpha", UUID_A),
                experience_url("Beta", UUID_B),
            ])))
            .mount(&server)
            .await;

        let items = SandboxIndexer.fetch_items(&ctx(&server).await).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_blocked_sitemap_falls_back_to_html_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let table = format!(
            r#"<html><body><table id="sitemap"><tbody><tr><td><a href="{}">Alpha</a></td></tr></tbody></table></body></html>"#,
            experience_url("Alpha", UUID_A)
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(table))
            .expect(1)
            .mount(&server)
            .await;

        let items = SandboxIndexer.fetch_items(&ctx(&server).await).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].uuid, UUID_A);
    }

    #[tokio::test]
    async fn test_challenge_page_with_failed_fallback_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><title>Just a moment...</title></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let items = SandboxIndexer.fetch_items(&ctx(&server).await).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_robots_disallow_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /__sitemap__/\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml_sitemap(&[experience_url("Alpha", UUID_A)])))
            .expect(0)
            .mount(&server)
            .await;

        assert!(SandboxIndexer.fetch_items(&ctx(&server).await).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_removes_experiences_dropped_from_sitemap() {
        let server = MockServer::start().await;
        let ctx = ctx(&server).await;

        let stale = SandboxExperience {
            uuid: UUID_B.into(),
            raw_title: "Gone".into(),
            url: experience_url("Gone", UUID_B),
            row_index: 1,
        };
        ctx.db().save_indexed_content(&SandboxIndexer.normalize(&stale).unwrap()).await.unwrap();

        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml_sitemap(&[experience_url("Alpha", UUID_A)])))
            .mount(&server)
            .await;

        let report = IndexRunner::run(&SandboxIndexer, &ctx).await.unwrap();
        assert_eq!(report.created, 1);
        assert!(ctx.db().find_content("sandbox", UUID_B).await.unwrap().is_none());
        assert!(ctx.db().find_content("sandbox", UUID_A).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_sitemap_keeps_existing_rows() {
        let server = MockServer::start().await;
        let ctx = ctx(&server).await;

        let existing = SandboxExperience {
            uuid: UUID_B.into(),
            raw_title: "Kept".into(),
            url: experience_url("Kept", UUID_B),
            row_index: 1,
        };
        ctx.db().save_indexed_content(&SandboxIndexer.normalize(&existing).unwrap()).await.unwrap();

        Mock::given(method("GET"))
            .and(path("/__sitemap__/experiences.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml_sitemap(&[])))
            .mount(&server)
            .await;

        IndexRunner::run(&SandboxIndexer, &ctx).await.unwrap();
        assert_eq!(ctx.db().count_content(Some("sandbox")).await.unwrap(), 1);
    }
}
