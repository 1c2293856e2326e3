// # HTTP Page Source
//
// This crate provides the HTTP page source for the threadwatch system.
//
// ## Purpose
//
// Performs one GET of the watched page per engine tick and hands back the
// body and status. Pages behind bot filters tend to answer plain clients
// with a challenge, so requests look like a desktop browser: browser
// User-Agent, Accept and Accept-Language headers, and a cookie jar that
// survives across ticks.
//
// ## Trust Level: Untrusted (Page Source)
//
// - ✅ One request per `fetch()` call
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Non-2xx statuses are reported, not hidden
// - ❌ NO retry logic (owned by PollEngine: the next tick is the retry)
// - ❌ NO parsing (owned by PageParser)
// - ❌ NO background tasks

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use threadwatch_core::ComponentRegistry;
use threadwatch_core::config::PageSourceConfig;
use threadwatch_core::traits::{FetchedPage, PageSource, PageSourceFactory};
use threadwatch_core::{Error, Result};

/// Default User-Agent (desktop Chrome)
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

/// Default Accept-Language
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Default HTTP timeout for page requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP page source
///
/// # Trust Level: Untrusted
///
/// Stateless apart from the cookie jar. All coordination (timeouts across
/// the whole tick, retries, cadence) is owned by `PollEngine`.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    /// Create a source with the default browser headers
    pub fn new() -> Result<Self> {
        Self::with_headers(None, None)
    }

    /// Create a source, overriding User-Agent and/or Accept-Language
    pub fn with_headers(user_agent: Option<&str>, accept_language: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(user_agent.unwrap_or(DEFAULT_USER_AGENT))?);
        headers.insert(
            ACCEPT_LANGUAGE,
            header_value(accept_language.unwrap_or(DEFAULT_ACCEPT_LANGUAGE))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::config(format!("Invalid header value '{}': {}", value, e)))
}

/// Translate a transport error into the core taxonomy
fn map_transport_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("GET {} timed out", url))
    } else {
        Error::fetch(format!("GET {} failed: {}", url, e))
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        if !(200..300).contains(&status) {
            tracing::warn!("GET {} returned HTTP {}", url, status);
        }

        Ok(FetchedPage::new(body, status, final_url))
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP page sources
pub struct HttpFactory;

impl PageSourceFactory for HttpFactory {
    fn create(&self, config: &PageSourceConfig) -> Result<Box<dyn PageSource>> {
        match config {
            PageSourceConfig::Http {
                user_agent,
                accept_language,
            } => Ok(Box::new(HttpPageSource::with_headers(
                user_agent.as_deref(),
                accept_language.as_deref(),
            )?)),
            _ => Err(Error::config("Invalid config for HTTP page source")),
        }
    }
}

/// Register the HTTP page source with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_source("http", Box::new(HttpFactory));
}
