// # Notification Sink Trait
//
// Defines the interface for delivering notifications to the operator.
//
// ## Implementations
//
// - Telegram Bot API: `threadwatch-sink-telegram` crate
//
// The destination (chat, channel, ...) is part of the sink's own
// configuration; the engine only hands over content.

use async_trait::async_trait;

/// Trait for notification sink implementations
///
/// Both operations must be safe to repeat: the dispatcher may call them
/// again after a transient failure.
///
/// # Trust Level: Untrusted
///
/// Sinks are isolated and single-shot. They translate remote responses into
/// the core error taxonomy so the dispatcher can decide what to retry:
///
/// - transport errors, 5xx responses → [`Error::Http`](crate::Error::Http)
/// - HTTP 429 → [`Error::RateLimited`](crate::Error::RateLimited), with the
///   server's wait hint when present
/// - any other refusal (bad payload, unreachable image URL) →
///   [`Error::Rejected`](crate::Error::Rejected)
///
/// ## Forbidden Capabilities
/// - ❌ Retry, back off or sleep (owned by `NotificationDispatcher`)
/// - ❌ Access the state store
/// - ❌ Decide which comments to send
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send a text message
    async fn send_text(&self, text: &str) -> Result<(), crate::Error>;

    /// Send an image by URL, with a caption
    async fn send_image(&self, image_url: &str, caption: &str) -> Result<(), crate::Error>;

    /// Get the sink name (for logging/debugging)
    fn sink_name(&self) -> &'static str;
}

/// Helper trait for constructing sinks from configuration
pub trait NotificationSinkFactory: Send + Sync {
    /// Create a NotificationSink instance from configuration
    fn create(
        &self,
        config: &crate::config::SinkConfig,
    ) -> Result<Box<dyn NotificationSink>, crate::Error>;
}
