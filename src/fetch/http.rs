//! Conditional HTTP fetching for feeds.
//!
//! One request per feed per cycle, with cache validators echoed back so
//! unchanged feeds cost a 304 and no body. Temporary redirects are followed
//! transparently; a permanent redirect (301) stops the request so the
//! caller can observe the move and update the feed's canonical URL.

use futures::StreamExt;
use reqwest::header;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::FetchConfig;

/// Synthetic status recorded when a feed is disabled because a permanent
/// redirect pointed at an already-subscribed feed.
pub const STATUS_DUPLICATED_FEED: i64 = 900;

/// Synthetic status recorded when the request never produced an HTTP
/// response (DNS failure, refused connection, timeout).
pub const STATUS_NETWORK_ERROR: i64 = 503;

/// Network-level fetch errors: the request produced no usable response.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// DNS, connection, or TLS error
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    TooLarge,
    /// Response was incomplete (fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

/// The parts of an HTTP response the fetch cycle cares about.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// `ETag` header, kept verbatim for the next `If-None-Match`.
    pub etag: Option<String>,
    /// `Last-Modified` header, kept verbatim for `If-Modified-Since`.
    pub last_modified: Option<String>,
    /// `Location` header, resolved to an absolute URL.
    pub location: Option<String>,
    pub body: Vec<u8>,
}

/// How the fetch cycle should react to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// 200, or a temporary redirect resolved to 200: parse the body.
    Fresh,
    /// 304: nothing changed since the stored validators.
    NotModified,
    /// 301: the feed moved permanently.
    Moved,
    /// 403: treated as a failed cycle.
    Forbidden,
    /// 404: treated as a failed cycle.
    NotFound,
    /// 410: the feed is gone for good.
    Gone,
    /// Anything else: recorded but otherwise ignored.
    Other(u16),
}

/// Classify an HTTP status into the cycle's decision table.
pub fn classify(status: u16) -> StatusOutcome {
    match status {
        200 => StatusOutcome::Fresh,
        301 => StatusOutcome::Moved,
        304 => StatusOutcome::NotModified,
        403 => StatusOutcome::Forbidden,
        404 => StatusOutcome::NotFound,
        410 => StatusOutcome::Gone,
        other => StatusOutcome::Other(other),
    }
}

/// Redirect policy: follow temporary redirects (302/303/307/308) up to 10
/// hops, but stop on 301 so the caller sees the permanent move itself.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.status() == StatusCode::MOVED_PERMANENTLY {
            return attempt.stop();
        }
        if attempt.previous().len() >= 10 {
            return attempt.error("Too many redirects (max 10)");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Build the HTTP client shared by all fetch workers.
///
/// # Errors
///
/// Returns the underlying `reqwest` error if the TLS backend cannot be
/// initialized.
pub fn build_client(config: &FetchConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .redirect(redirect_policy())
        .connect_timeout(Duration::from_secs(config.timeout_secs))
        .build()
}

/// Issue a conditional GET for a feed.
///
/// The stored validators are echoed back only when both are present; some
/// servers mishandle a lone `If-Modified-Since`, so a feed that never sent
/// an ETag is always fetched in full.
///
/// # Errors
///
/// Returns [`NetworkError`] when no HTTP response was obtained or the body
/// could not be read within the configured limits. HTTP error statuses are
/// not errors here: they come back as an [`HttpResponse`] for the cycle's
/// decision table.
pub async fn conditional_get(
    client: &reqwest::Client,
    url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
    config: &FetchConfig,
) -> Result<HttpResponse, NetworkError> {
    let mut request = client.get(url);
    if let (Some(etag), Some(last_modified)) = (etag, last_modified) {
        request = request
            .header(header::IF_NONE_MATCH, etag)
            .header(header::IF_MODIFIED_SINCE, last_modified);
    }

    let response = tokio::time::timeout(Duration::from_secs(config.timeout_secs), request.send())
        .await
        .map_err(|_| NetworkError::Timeout)??;

    let status = response.status().as_u16();
    let final_url = response.url().clone();

    let header_string = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let etag = header_string(header::ETAG);
    let last_modified = header_string(header::LAST_MODIFIED);
    let location = header_string(header::LOCATION).map(|l| absolutize(&l, &final_url));

    let body = if response.status() == StatusCode::NOT_MODIFIED {
        Vec::new()
    } else {
        read_limited_bytes(response, config.max_body_bytes).await?
    };

    Ok(HttpResponse {
        status,
        etag,
        last_modified,
        location,
        body,
    })
}

/// Resolve a possibly relative `Location` header against the request URL.
fn absolutize(location: &str, base: &Url) -> String {
    match base.join(location) {
        Ok(resolved) => resolved.into(),
        Err(_) => location.to_owned(),
    }
}

/// Read a response body as a stream, enforcing the size limit before
/// buffering rather than after.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, NetworkError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(NetworkError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(NetworkError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(NetworkError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(NetworkError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> FetchConfig {
        FetchConfig {
            fetch_icons: false,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(200), StatusOutcome::Fresh);
        assert_eq!(classify(301), StatusOutcome::Moved);
        assert_eq!(classify(304), StatusOutcome::NotModified);
        assert_eq!(classify(403), StatusOutcome::Forbidden);
        assert_eq!(classify(404), StatusOutcome::NotFound);
        assert_eq!(classify(410), StatusOutcome::Gone);
        assert_eq!(classify(500), StatusOutcome::Other(500));
        assert_eq!(classify(418), StatusOutcome::Other(418));
    }

    #[tokio::test]
    async fn test_get_captures_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let client = build_client(&config()).unwrap();
        let response = conditional_get(
            &client,
            &format!("{}/feed", server.uri()),
            None,
            None,
            &config(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            response.last_modified.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
        assert_eq!(response.body, b"<rss/>");
    }

    #[tokio::test]
    async fn test_validators_sent_only_when_both_present() {
        let server = MockServer::start().await;
        // Higher priority than the catch-all, so a conditional request
        // always lands here
        // wiremock splits incoming header values on commas, so the date
        // must be matched as the two comma-separated parts
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(headers(
                "If-Modified-Since",
                vec!["Mon", "01 Jan 2024 00:00:00 GMT"],
            ))
            .respond_with(ResponseTemplate::new(304))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        // A request without the conditional headers hits this catch-all
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client(&config()).unwrap();
        let url = format!("{}/feed", server.uri());

        // Only an etag stored: request goes out unconditional
        let response = conditional_get(&client, &url, Some("\"v1\""), None, &config())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        // Both stored: conditional request, 304 back
        let response = conditional_get(
            &client,
            &url,
            Some("\"v1\""),
            Some("Mon, 01 Jan 2024 00:00:00 GMT"),
            &config(),
        )
        .await
        .unwrap();
        assert_eq!(response.status, 304);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "/new"),
            )
            .mount(&server)
            .await;

        let client = build_client(&config()).unwrap();
        let response = conditional_get(
            &client,
            &format!("{}/old", server.uri()),
            None,
            None,
            &config(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 301);
        // Relative Location comes back absolute
        assert_eq!(
            response.location.as_deref(),
            Some(format!("{}/new", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_temporary_redirect_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "/elsewhere"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&server)
            .await;

        let client = build_client(&config()).unwrap();
        let response = conditional_get(
            &client,
            &format!("{}/feed", server.uri()),
            None,
            None,
            &config(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<rss/>");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let client = build_client(&config()).unwrap();
        let small = FetchConfig {
            max_body_bytes: 1024,
            ..config()
        };
        let result = conditional_get(
            &client,
            &format!("{}/feed", server.uri()),
            None,
            None,
            &small,
        )
        .await;

        assert!(matches!(result, Err(NetworkError::TooLarge)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = build_client(&config()).unwrap();
        // Port 1 is essentially never listening
        let result =
            conditional_get(&client, "http://127.0.0.1:1/feed", None, None, &config()).await;
        assert!(matches!(result, Err(NetworkError::Transport(_))));
    }
}
