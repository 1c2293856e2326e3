// # Page Source Trait
//
// Defines the interface for fetching the watched page.
//
// ## Implementations
//
// - Plain HTTP GET: `threadwatch-source-http` crate
//
// ## Usage
//
// ```rust,ignore
// use threadwatch_core::PageSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* PageSource implementation */;
//
//     let page = source.fetch("https://example.com/thread-42").await?;
//     if page.is_success() {
//         println!("{} bytes", page.body.len());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

/// A fetched document together with its HTTP status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Response body
    pub body: String,
    /// HTTP status code
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
}

impl FetchedPage {
    /// Create a fetched page
    pub fn new(body: impl Into<String>, status: u16, final_url: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status,
            final_url: final_url.into(),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for page source implementations
///
/// A page source performs exactly one GET per call and reports what came
/// back. A non-2xx status is not an error at this layer: the engine treats
/// it the same way as a transport failure.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS requests to the given URL
/// - ✅ Return the body and status, or a transport error
///
/// ## Forbidden Capabilities
/// - ❌ Implement retry logic or backoff (owned by `PollEngine`)
/// - ❌ Parse the page or decide what is new (owned by `PageParser`/detector)
/// - ❌ Access the state store (owned by `PollEngine`)
/// - ❌ Spawn tasks or polling loops (the engine owns the cadence)
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the document at `url`
    ///
    /// # Returns
    ///
    /// - `Ok(FetchedPage)`: A response was received (any status)
    /// - `Err(Error)`: Transport failure, timeout, unreadable body
    async fn fetch(&self, url: &str) -> Result<FetchedPage, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing page sources from configuration
pub trait PageSourceFactory: Send + Sync {
    /// Create a PageSource instance from configuration
    fn create(
        &self,
        config: &crate::config::PageSourceConfig,
    ) -> Result<Box<dyn PageSource>, crate::Error>;
}
