//! Favicon retrieval for feed websites.
//!
//! Icons are cosmetic: any failure falls back to a built-in placeholder so
//! the cycle never fails, slows down much, or retries because of one. The
//! site's own `<link rel=icon>` declaration wins over the conventional
//! `/favicon.ico` location.

use std::time::Duration;

use crate::markup;
use crate::url;

/// 1x1 transparent GIF served when a site has no reachable favicon.
pub const DEFAULT_ICON: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Largest icon we are willing to store.
const MAX_ICON_BYTES: usize = 512 * 1024;

/// Largest page we are willing to scan for an icon declaration.
const MAX_PAGE_BYTES: usize = 1024 * 1024;

/// A fetched (or defaulted) favicon.
#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// The URL the bytes came from; `None` for the placeholder.
    pub source_url: Option<String>,
}

impl Icon {
    fn fallback() -> Self {
        Self {
            bytes: DEFAULT_ICON.to_vec(),
            content_type: "image/gif".to_owned(),
            source_url: None,
        }
    }
}

/// Fetch the favicon for a website.
///
/// Tries the page's own `<link rel=icon>` declaration first, then the
/// conventional `<origin>/favicon.ico`. Total function: an unparsable page
/// URL, network trouble, non-200 responses, or an oversized body all yield
/// the built-in placeholder.
pub async fn fetch_icon(client: &reqwest::Client, page_url: &str, timeout_secs: u64) -> Icon {
    let Ok(base) = url::validate(page_url) else {
        return Icon::fallback();
    };

    if let Some(declared) = declared_icon_url(client, page_url, timeout_secs).await {
        if let Some(icon) = fetch_one(client, &declared, timeout_secs).await {
            return icon;
        }
    }

    let Ok(conventional) = base.join("/favicon.ico") else {
        return Icon::fallback();
    };
    match fetch_one(client, conventional.as_str(), timeout_secs).await {
        Some(icon) => icon,
        None => Icon::fallback(),
    }
}

/// Scan the website's HTML for a `<link rel=icon>` href.
async fn declared_icon_url(
    client: &reqwest::Client,
    page_url: &str,
    timeout_secs: u64,
) -> Option<String> {
    let response = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        client.get(page_url).send(),
    )
    .await
    .ok()?
    .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let body = response.bytes().await.ok()?;
    if body.len() > MAX_PAGE_BYTES {
        return None;
    }
    let html = String::from_utf8_lossy(&body);
    markup::find_icon_link(&html, page_url)
}

/// Fetch one candidate icon URL; `None` on any failure.
async fn fetch_one(
    client: &reqwest::Client,
    icon_url: &str,
    timeout_secs: u64,
) -> Option<Icon> {
    let response = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        client.get(icon_url).send(),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(error)) => {
            tracing::debug!(url = %icon_url, error = %error, "Favicon request failed");
            return None;
        }
        Err(_) => {
            tracing::debug!(url = %icon_url, "Favicon request timed out");
            return None;
        }
    };

    if !response.status().is_success() {
        return None;
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .unwrap_or_else(|| "image/x-icon".to_owned());

    match response.bytes().await {
        Ok(bytes) if !bytes.is_empty() && bytes.len() <= MAX_ICON_BYTES => Some(Icon {
            bytes: bytes.to_vec(),
            content_type,
            source_url: Some(icon_url.to_owned()),
        }),
        _ => None,
    }
}
