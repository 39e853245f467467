use std::borrow::Cow;
use thiserror::Error;
use url::Url;

/// Query parameters stripped by [`normalize`].
///
/// Tracking parameters make otherwise-identical feed and entry URLs hash
/// differently, defeating duplicate detection. The list is fixed; matching
/// is exact (no prefix matching) so legitimate parameters survive.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
];

/// Errors that can occur while validating a feed URL.
#[derive(Debug, Error)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Canonicalizes a feed or content URL by removing tracking query parameters.
///
/// Non-blacklisted parameters are preserved in their original order; scheme,
/// host, path, and fragment are left untouched. Total function: input that
/// cannot be parsed as a URL is returned unchanged (best effort), so callers
/// never need to handle an error from normalization.
pub fn normalize(url_str: &str) -> String {
    let Ok(mut url) = Url::parse(url_str) else {
        return url_str.to_owned();
    };

    if url.query().is_none() {
        return url.into();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    url.into()
}

/// Derives a display label from a URL: the hostname, or an empty string if
/// the input has none or cannot be parsed.
pub fn friendly_host(url_str: &str) -> String {
    Url::parse(url_str)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Validates a URL for use as a feed source before its first fetch.
///
/// Only http/https URLs with a host are accepted; everything else belongs to
/// the subscription layer's error reporting, not the fetch cycle.
///
/// # Errors
///
/// Returns [`UrlValidationError`] if the URL cannot be parsed, uses a
/// non-HTTP scheme, or lacks a host.
pub fn validate(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Resolves a potentially relative URL against a base URL.
///
/// Falls back to returning the href as-is when the base itself cannot be
/// parsed — downstream validation rejects it before any fetch.
pub fn resolve<'a>(href: &'a str, base_url: &str) -> Cow<'a, str> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Cow::Borrowed(href);
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return Cow::Owned(resolved.into());
        }
    }

    Cow::Borrowed(href)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_tracking_params() {
        assert_eq!(
            normalize("https://example.com/post?utm_source=rss&utm_medium=feed"),
            "https://example.com/post"
        );
    }

    #[test]
    fn test_normalize_preserves_other_params_in_order() {
        assert_eq!(
            normalize("https://example.com/p?id=42&utm_campaign=x&page=2"),
            "https://example.com/p?id=42&page=2"
        );
    }

    #[test]
    fn test_normalize_untouched_without_query() {
        assert_eq!(
            normalize("https://example.com/feed.xml"),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_normalize_preserves_fragment() {
        assert_eq!(
            normalize("https://example.com/p?utm_source=a#section"),
            "https://example.com/p#section"
        );
    }

    #[test]
    fn test_normalize_is_total_on_garbage() {
        assert_eq!(normalize("not a url at all"), "not a url at all");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_no_prefix_matching() {
        // "utm_sourced" is not on the blacklist; only exact names are stripped
        assert_eq!(
            normalize("https://example.com/p?utm_sourced=keep"),
            "https://example.com/p?utm_sourced=keep"
        );
    }

    #[test]
    fn test_friendly_host() {
        assert_eq!(friendly_host("http://example.org/feed.xml"), "example.org");
        assert_eq!(friendly_host("garbage"), "");
        assert_eq!(friendly_host(""), "");
    }

    #[test]
    fn test_validate_accepts_http_https() {
        assert!(validate("https://example.com/feed.xml").is_ok());
        assert!(validate("http://example.com/feed.xml").is_ok());
    }

    #[test]
    fn test_validate_rejects_other_schemes() {
        assert!(matches!(
            validate("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate("ftp://example.com/feed"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unparseable() {
        assert!(matches!(
            validate("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve("/feed.xml", "https://example.com/page"),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            resolve("feed.xml", "https://example.com/blog/"),
            "https://example.com/blog/feed.xml"
        );
    }

    #[test]
    fn test_resolve_absolute_passthrough() {
        assert_eq!(
            resolve("https://other.com/feed", "https://example.com"),
            "https://other.com/feed"
        );
    }
}
