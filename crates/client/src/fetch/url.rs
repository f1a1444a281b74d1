//! URL canonicalization and robots.txt addressing.

use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize a URL string before it is fetched or used as a cache key.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let mut parsed = Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    let host = parsed
        .host_str()
        .map(str::to_lowercase)
        .ok_or_else(|| UrlError::MissingHost(url_str.clone()))?;
    parsed
        .set_host(Some(&host))
        .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Domain a robots.txt policy is cached under: the lowercased host, plus
/// the port when it is not the scheme default.
pub fn robots_domain(url: &Url) -> Result<String, UrlError> {
    let host = url
        .host_str()
        .ok_or_else(|| UrlError::MissingHost(url.to_string()))?
        .to_ascii_lowercase();
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Location of the robots.txt governing `url`.
pub fn robots_url(url: &Url) -> Result<Url, UrlError> {
    let domain = robots_domain(url)?;
    Url::parse(&format!("{}://{domain}/robots.txt", url.scheme())).map_err(|e| UrlError::InvalidUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_basic() {
        let url = canonicalize("https://peer.decentraland.org/content").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("peer.decentraland.org"));
    }

    #[test]
    fn test_canonicalize_default_scheme() {
        let url = canonicalize("www.spatial.io/root.xml").unwrap();
        assert_eq!(url.as_str(), "https://www.spatial.io/root.xml");
    }

    #[test]
    fn test_canonicalize_lowercase_host_and_fragment() {
        let url = canonicalize("  https://WWW.Sandbox.GAME/en/#top ").unwrap();
        assert_eq!(url.as_str(), "https://www.sandbox.game/en/");
    }

    #[test]
    fn test_canonicalize_preserve_query() {
        let url = canonicalize("https://api.neos.com/api/sessions?accessLevel=Anyone").unwrap();
        assert_eq!(url.query(), Some("accessLevel=Anyone"));
    }

    #[test]
    fn test_canonicalize_rejects() {
        assert!(matches!(canonicalize(""), Err(UrlError::Empty)));
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
        assert!(matches!(canonicalize("file:///etc/passwd"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(canonicalize("https://"), Err(UrlError::InvalidUrl(_))));
    }

    #[test]
    fn test_robots_domain_keeps_non_default_port() {
        let url = canonicalize("http://127.0.0.1:8080/page").unwrap();
        assert_eq!(robots_domain(&url).unwrap(), "127.0.0.1:8080");

        let url = canonicalize("https://example.com:443/page").unwrap();
        assert_eq!(robots_domain(&url).unwrap(), "example.com");
    }

    #[test]
    fn test_robots_url() {
        let url = canonicalize("https://www.sandbox.game/en/experiences/x/page?a=1").unwrap();
        assert_eq!(robots_url(&url).unwrap().as_str(), "https://www.sandbox.game/robots.txt");

        let url = canonicalize("http://localhost:3000/a").unwrap();
        assert_eq!(robots_url(&url).unwrap().as_str(), "http://localhost:3000/robots.txt");
    }
}
