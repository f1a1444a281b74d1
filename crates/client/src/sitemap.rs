//! Sitemap parsing.
//!
//! Two shapes are understood: standard XML sitemaps (`<urlset><url><loc>`)
//! and the HTML table some sites render instead
//! (`table#sitemap tbody tr td:first-child a`).

use quick_xml::Reader;
use quick_xml::events::Event;
use scraper::{Html, Selector};

#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    #[error("malformed sitemap XML: {0}")]
    Xml(String),

    #[error("invalid selector: {0}")]
    Selector(String),
}

/// Whether `body` looks like an XML sitemap rather than an HTML page.
pub fn is_xml(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("<?xml") || body.contains("<urlset") || body.contains("<sitemapindex")
}

/// Every URL listed in `body`, in document order.
pub fn sitemap_urls(body: &str) -> Result<Vec<String>, SitemapError> {
    if is_xml(body) { xml_locs(body) } else { html_table_links(body) }
}

/// Text of every `<loc>` element, namespaces ignored.
pub fn xml_locs(body: &str) -> Result<Vec<String>, SitemapError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => {
                in_loc = true;
                current.clear();
            }
            Ok(Event::Text(te)) if in_loc => {
                let text = te.unescape().map_err(|e| SitemapError::Xml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::CData(c)) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => {
                in_loc = false;
                let loc = current.trim();
                if !loc.is_empty() {
                    locs.push(loc.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SitemapError::Xml(format!("at position {}: {e}", reader.buffer_position())));
            }
            _ => {}
        }
    }

    Ok(locs)
}

/// `href` of the first-column link in each row of `table#sitemap`.
pub fn html_table_links(body: &str) -> Result<Vec<String>, SitemapError> {
    let document = Html::parse_document(body);
    let rows = Selector::parse("table#sitemap tbody tr").map_err(|e| SitemapError::Selector(e.to_string()))?;
    let link = Selector::parse("td:first-child a").map_err(|e| SitemapError::Selector(e.to_string()))?;

    Ok(document
        .select(&rows)
        .filter_map(|row| row.select(&link).next())
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect())
}
