use reqwest::header::CONTENT_TYPE;
use reqwest::redirect;
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::TlsConnector;
use url::Url;

use super::gemini;
use super::parser::{media_type_essence, parse_feed, ParseResult};
use super::types::Feed;
use crate::util::{read_limited_bytes, transport_for, LimitedReadError, Transport, UrlValidationError};

const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching and parsing a feed.
///
/// These cover the whole path from URL validation through the transport to
/// the parser. Storage failures are reported by the callers that index.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL scheme has no transport.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    /// The URL could not be parsed or failed the host policy.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The remote answered with a failure status.
    #[error("Upstream error: {status} {meta}")]
    UpstreamError { status: u16, meta: String },
    /// The declared content type is missing, malformed, or not a feed format.
    #[error("Unintelligible content type: {0:?}")]
    UnintelligibleContentType(String),
    /// RSS, Atom or JSON Feed body that feed-rs rejected.
    #[error("Malformed feed: {0}")]
    MalformedSyndication(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// Network-level error from the HTTPS client (DNS, connection, TLS).
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Gemini TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Connect plus read exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,
    /// Body exceeded the configured size ceiling.
    #[error("Response too large")]
    ResponseTooLarge,
    /// Gemini response header that does not follow `<STATUS> <META>\r\n`.
    #[error("Invalid response header: {0}")]
    InvalidHeader(String),
}

impl From<UrlValidationError> for FetchError {
    fn from(err: UrlValidationError) -> Self {
        match err {
            UrlValidationError::UnsupportedScheme(scheme) => FetchError::UnsupportedProtocol(scheme),
            other => FetchError::InvalidUrl(other.to_string()),
        }
    }
}

impl From<LimitedReadError> for FetchError {
    fn from(err: LimitedReadError) -> Self {
        match err {
            LimitedReadError::TooLarge => FetchError::ResponseTooLarge,
            LimitedReadError::Network(e) => FetchError::Network(e),
        }
    }
}

/// Limits applied to every fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    /// Bounds connect and read together.
    pub timeout: Duration,
    /// Largest body accepted, in bytes.
    pub max_size: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_size: 1024 * 1024 * 1024,
        }
    }
}

/// Body of a successful fetch, before parsing.
#[derive(Debug, Clone)]
pub struct RawFeedPayload {
    /// Where the body was served from, after any redirects.
    pub url: Url,
    /// Lowercase `type/subtype` with parameters dropped.
    pub media_type: String,
    pub body: Vec<u8>,
}

/// Retrieves feeds over Gemini or HTTPS.
///
/// Cloning is cheap: the HTTP client and TLS connector are reference counted.
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    tls: TlsConnector,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        // Redirects are re-checked against the same host policy as the
        // original URL.
        let policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !matches!(transport_for(attempt.url()), Ok(Transport::Http)) {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let http = reqwest::Client::builder()
            .user_agent(concat!("gemmit/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.timeout)
            .redirect(policy)
            .build()?;

        Ok(Self {
            http,
            tls: gemini::connector()?,
            settings,
        })
    }

    /// Fetches the raw body behind `url`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::UnsupportedProtocol`] - scheme other than `gemini`/`https`
    /// - [`FetchError::InvalidUrl`] - private or missing host
    /// - [`FetchError::Timeout`] - connect plus read exceeded the timeout
    /// - [`FetchError::UpstreamError`] - non-success status
    /// - [`FetchError::ResponseTooLarge`] - body over the size ceiling
    /// - [`FetchError::UnintelligibleContentType`] - missing or malformed type
    pub async fn fetch(&self, url: &Url) -> Result<RawFeedPayload, FetchError> {
        let transport = transport_for(url)?;

        let request = async {
            match transport {
                Transport::Gemini => gemini::fetch(&self.tls, url, self.settings.max_size).await,
                Transport::Http => self.fetch_http(url).await,
            }
        };

        tokio::time::timeout(self.settings.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    /// Fetches `url` and parses the body into a [`Feed`].
    pub async fn fetch_feed(&self, url: &Url) -> Result<Feed, FetchError> {
        let payload = self.fetch(url).await?;
        let ParseResult { feed, skipped } =
            parse_feed(&payload.url, &payload.media_type, &payload.body)?;

        if skipped > 0 {
            tracing::warn!(
                feed = %url,
                skipped = skipped,
                "Entries without a link or date skipped"
            );
        }
        tracing::debug!(feed = %url, kind = feed.kind.as_str(), items = feed.items.len(), "Parsed feed");

        Ok(feed)
    }

    async fn fetch_http(&self, url: &Url) -> Result<RawFeedPayload, FetchError> {
        let response = self.http.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamError {
                status: status.as_u16(),
                meta: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let raw_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let media_type = media_type_essence(&raw_type)
            .ok_or(FetchError::UnintelligibleContentType(raw_type))?;

        // Relative links resolve against where the body came from
        let final_url = response.url().clone();
        if final_url != *url {
            tracing::debug!(requested = %url, fetched = %final_url, "Feed redirected");
        }
        let body = read_limited_bytes(response, self.settings.max_size).await?;

        Ok(RawFeedPayload {
            url: final_url,
            media_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedKind;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><title>One</title><link>https://example.com/1</link><pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

    fn fetcher() -> Fetcher {
        Fetcher::new(FetchSettings::default()).unwrap()
    }

    async fn serve(template: ResponseTemplate) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(template)
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn test_fetch_rss_success() {
        let (_server, url) =
            serve(ResponseTemplate::new(200).set_body_raw(VALID_RSS, "application/rss+xml")).await;

        let feed = fetcher().fetch_feed(&url).await.unwrap();
        assert_eq!(feed.title, "Test");
        assert_eq!(feed.kind, FeedKind::Syndication);
        assert_eq!(feed.items.len(), 1);
    }

    #[tokio::test]
    async fn test_redirected_feed_resolves_links_against_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/blog/feed.xml"))
            .mount(&server)
            .await;
        let moved = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Moved</title>
    <item><title>One</title><link>posts/1</link><pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/blog/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(moved, "application/rss+xml"))
            .mount(&server)
            .await;

        let requested = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let payload = fetcher().fetch(&requested).await.unwrap();
        assert_eq!(payload.url.path(), "/blog/feed.xml");

        let feed = fetcher().fetch_feed(&requested).await.unwrap();
        assert_eq!(
            feed.items[0].url,
            format!("{}/blog/posts/1", server.uri())
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_media_type_essence() {
        let (_server, url) = serve(
            ResponseTemplate::new(200).set_body_raw("# T", "text/gemini; charset=utf-8"),
        )
        .await;

        let payload = fetcher().fetch(&url).await.unwrap();
        assert_eq!(payload.media_type, "text/gemini");
        assert_eq!(payload.body, b"# T");
        assert_eq!(payload.url, url);
    }

    #[tokio::test]
    async fn test_fetch_404_is_upstream_error() {
        let (_server, url) = serve(ResponseTemplate::new(404)).await;

        match fetcher().fetch(&url).await.unwrap_err() {
            FetchError::UpstreamError { status, meta } => {
                assert_eq!(status, 404);
                assert_eq!(meta, "Not Found");
            }
            e => panic!("Expected UpstreamError, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_server_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/feed", server.uri())).unwrap();

        assert!(matches!(
            fetcher().fetch(&url).await,
            Err(FetchError::UpstreamError { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_html_not_implemented() {
        let (_server, url) =
            serve(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html")).await;

        assert!(matches!(
            fetcher().fetch_feed(&url).await,
            Err(FetchError::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_content_type() {
        let (_server, url) = serve(
            ResponseTemplate::new(200).set_body_raw(VALID_RSS, "application/octet-stream"),
        )
        .await;

        assert!(matches!(
            fetcher().fetch_feed(&url).await,
            Err(FetchError::UnintelligibleContentType(_))
        ));
    }

    #[tokio::test]
    async fn test_body_over_ceiling() {
        let (_server, url) =
            serve(ResponseTemplate::new(200).set_body_raw(VALID_RSS, "application/rss+xml")).await;
        let fetcher = Fetcher::new(FetchSettings {
            max_size: 16,
            ..FetchSettings::default()
        })
        .unwrap();

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(FetchError::ResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let (_server, url) = serve(
            ResponseTemplate::new(200)
                .set_body_raw(VALID_RSS, "application/rss+xml")
                .set_delay(Duration::from_secs(2)),
        )
        .await;
        let fetcher = Fetcher::new(FetchSettings {
            timeout: Duration::from_millis(200),
            ..FetchSettings::default()
        })
        .unwrap();

        assert!(matches!(fetcher.fetch(&url).await, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_rejected_urls() {
        let fetcher = fetcher();

        let ftp = Url::parse("ftp://example.com/feed").unwrap();
        assert!(matches!(
            fetcher.fetch(&ftp).await,
            Err(FetchError::UnsupportedProtocol(s)) if s == "ftp"
        ));

        let private = Url::parse("gemini://192.168.0.10/feed").unwrap();
        assert!(matches!(
            fetcher.fetch(&private).await,
            Err(FetchError::InvalidUrl(_))
        ));

        let remote_http = Url::parse("http://example.com/feed").unwrap();
        assert!(matches!(
            fetcher.fetch(&remote_http).await,
            Err(FetchError::UnsupportedProtocol(_))
        ));
    }
}
