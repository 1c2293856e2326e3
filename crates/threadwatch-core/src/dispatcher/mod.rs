//! Notification dispatcher
//!
//! Delivers one logical notification per comment: a text message followed by
//! one image message per image URL. The dispatcher owns the retry policy;
//! sinks are single-shot.
//!
//! ## Failure Handling
//!
//! - Retriable errors (transport, timeout, 5xx, rate limit) are retried up to
//!   `max_retries` times with exponential backoff
//! - Terminal errors (rejected payload, unusable image URL) are logged and
//!   not retried
//! - A failed part never prevents the remaining parts from being sent
//!
//! Whatever the outcome, the comment counts as processed. A comment whose
//! image is permanently rejected must not be notified again on every tick.
//!
//! ## Shutdown
//!
//! Backoff waits and image pauses end early once shutdown is requested, and
//! no further attempt is started. A send already in flight is bounded by
//! `send_timeout`.

pub mod format;

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::Error;
use crate::parser::CommentRecord;
use crate::traits::NotificationSink;

/// Bounded exponential backoff for a single send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: usize,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Ceiling for the computed delay
    pub max_delay: Duration,

    /// Deadline for one attempt
    pub send_timeout: Duration,
}

impl RetryPolicy {
    /// Build the policy from engine settings
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            send_timeout: config.send_timeout(),
        }
    }

    /// Backoff before retry number `attempt + 1`: `base * 2^attempt`, capped
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Wait before retrying after `error`
    ///
    /// A server wait hint longer than the backoff is honoured up to
    /// `max_delay`.
    pub fn delay_after(&self, attempt: usize, error: &Error) -> Duration {
        let backoff = self.backoff(attempt);
        match error.retry_after() {
            Some(hint) if hint > backoff => hint.min(self.max_delay).max(backoff),
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Result of delivering one comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Text and every image were sent
    Delivered {
        /// Number of images sent
        images_sent: usize,
    },

    /// At least one part could not be sent
    Failed {
        /// Last error encountered
        reason: String,
        /// Number of images that did go out
        images_sent: usize,
    },

    /// Shutdown was requested before every part was attempted
    Interrupted {
        /// Whether the text message went out
        text_sent: bool,
        /// Number of images that did go out
        images_sent: usize,
    },
}

impl DeliveryOutcome {
    /// Whether every part was sent
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// Whether delivery stopped because of a shutdown request
    pub fn is_interrupted(&self) -> bool {
        matches!(self, DeliveryOutcome::Interrupted { .. })
    }

    /// Whether anything at all reached the sink
    pub fn anything_sent(&self) -> bool {
        match self {
            DeliveryOutcome::Interrupted {
                text_sent,
                images_sent,
            } => *text_sent || *images_sent > 0,
            _ => true,
        }
    }

    /// Number of images that went out
    pub fn images_sent(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered { images_sent }
            | DeliveryOutcome::Failed { images_sent, .. }
            | DeliveryOutcome::Interrupted { images_sent, .. } => *images_sent,
        }
    }
}

/// Whether `shutdown` asks to stop; a dropped sender counts as a request
pub fn stop_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow() || rx.has_changed().is_err())
}

/// Sleep for `delay` unless shutdown is requested first; `false` if cut short
async fn pause(delay: Duration, shutdown: Option<&watch::Receiver<bool>>) -> bool {
    let Some(rx) = shutdown else {
        tokio::time::sleep(delay).await;
        return true;
    };
    let mut rx = rx.clone();
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop_signalled(&mut rx) => false,
    }
}

async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// One outbound call
#[derive(Debug, Clone, Copy)]
enum Part<'a> {
    Text(&'a str),
    Image { url: &'a str, caption: &'a str },
}

impl Part<'_> {
    fn label(&self) -> &'static str {
        match self {
            Part::Text(_) => "text",
            Part::Image { .. } => "image",
        }
    }
}

/// Result of sending one part
enum Attempt {
    Sent,
    Failed(Error),
    Interrupted,
}

/// Formats comments and sends them through a [`NotificationSink`]
pub struct NotificationDispatcher {
    sink: Box<dyn NotificationSink>,
    policy: RetryPolicy,
    page_url: String,
    title: String,
    image_delay: Duration,
}

impl NotificationDispatcher {
    /// Create a dispatcher for comments of `page_url`
    pub fn new(
        sink: Box<dyn NotificationSink>,
        policy: RetryPolicy,
        page_url: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            policy,
            page_url: page_url.into(),
            title: "New comment".to_string(),
            image_delay: Duration::from_millis(700),
        }
    }

    /// Headline used by [`dispatch`](Self::dispatch)
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Pause between image sends
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = delay;
        self
    }

    /// The active retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The regular headline
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Name of the underlying sink
    pub fn sink_name(&self) -> &'static str {
        self.sink.sink_name()
    }

    /// Deliver a comment under the regular headline
    pub async fn dispatch(&self, record: &CommentRecord) -> DeliveryOutcome {
        self.dispatch_until(record, &self.title, None).await
    }

    /// Deliver a comment under a custom headline
    pub async fn dispatch_titled(&self, record: &CommentRecord, title: &str) -> DeliveryOutcome {
        self.dispatch_until(record, title, None).await
    }

    /// Deliver a comment, giving up on waits and retries once `shutdown`
    /// asks to stop
    pub async fn dispatch_until(
        &self,
        record: &CommentRecord,
        title: &str,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> DeliveryOutcome {
        let mut last_error: Option<Error> = None;

        let message = format::build_message(record, title, &self.page_url);
        let text_sent = match self.send_with_retry(Part::Text(&message), shutdown).await {
            Attempt::Sent => true,
            Attempt::Failed(e) => {
                warn!("Text for comment {} not delivered: {}", record.id, e);
                last_error = Some(e);
                false
            }
            Attempt::Interrupted => {
                return DeliveryOutcome::Interrupted {
                    text_sent: false,
                    images_sent: 0,
                };
            }
        };

        let image_title = format!("{} - Image", title);
        let total = record.images.len();
        let mut images_sent = 0;
        for (idx, url) in record.images.iter().enumerate() {
            if idx > 0 && !self.image_delay.is_zero() && !pause(self.image_delay, shutdown).await {
                return DeliveryOutcome::Interrupted {
                    text_sent,
                    images_sent,
                };
            }

            let caption =
                format::build_caption(record, &image_title, &self.page_url, idx + 1, total);
            let part = Part::Image {
                url,
                caption: &caption,
            };
            match self.send_with_retry(part, shutdown).await {
                Attempt::Sent => images_sent += 1,
                Attempt::Failed(e) => {
                    warn!("Image {} of comment {} not delivered: {}", url, record.id, e);
                    last_error = Some(e);
                }
                Attempt::Interrupted => {
                    return DeliveryOutcome::Interrupted {
                        text_sent,
                        images_sent,
                    };
                }
            }
        }

        match last_error {
            None => {
                debug!("Comment {} delivered with {} image(s)", record.id, images_sent);
                DeliveryOutcome::Delivered { images_sent }
            }
            Some(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
                images_sent,
            },
        }
    }

    /// Send a plain message, optionally followed by an image captioned with it
    pub async fn announce(&self, message: &str, image_url: Option<&str>) -> DeliveryOutcome {
        self.announce_until(message, image_url, None).await
    }

    /// [`announce`](Self::announce), giving up once `shutdown` asks to stop
    pub async fn announce_until(
        &self,
        message: &str,
        image_url: Option<&str>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> DeliveryOutcome {
        let message = format::trim_text(message, format::MESSAGE_LIMIT);
        let mut last_error = None;

        let text_sent = match self.send_with_retry(Part::Text(&message), shutdown).await {
            Attempt::Sent => true,
            Attempt::Failed(e) => {
                warn!("Announcement not delivered: {}", e);
                last_error = Some(e);
                false
            }
            Attempt::Interrupted => {
                return DeliveryOutcome::Interrupted {
                    text_sent: false,
                    images_sent: 0,
                };
            }
        };

        let mut images_sent = 0;
        if let Some(url) = image_url.filter(|u| !u.trim().is_empty()) {
            let caption = format::trim_text(&message, format::CAPTION_LIMIT);
            let part = Part::Image {
                url,
                caption: &caption,
            };
            match self.send_with_retry(part, shutdown).await {
                Attempt::Sent => images_sent = 1,
                Attempt::Failed(e) => {
                    warn!("Announcement image not delivered: {}", e);
                    last_error = Some(e);
                }
                Attempt::Interrupted => {
                    return DeliveryOutcome::Interrupted {
                        text_sent,
                        images_sent,
                    };
                }
            }
        }

        match last_error {
            None => DeliveryOutcome::Delivered { images_sent },
            Some(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
                images_sent,
            },
        }
    }

    /// Send one part, retrying transient failures
    async fn send_with_retry(
        &self,
        part: Part<'_>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Attempt {
        let mut last_error = None;

        for attempt in 0..=self.policy.max_retries {
            if stop_requested(shutdown) {
                info!("Shutdown requested, {} send abandoned", part.label());
                return Attempt::Interrupted;
            }

            match self.send_once(part).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("{} send succeeded after {} retries", part.label(), attempt);
                    }
                    return Attempt::Sent;
                }
                Err(e) if !e.is_retriable() => {
                    warn!("{} send rejected by {}: {}", part.label(), self.sink.sink_name(), e);
                    return Attempt::Failed(e);
                }
                Err(e) => {
                    warn!("{} send attempt {} failed: {}", part.label(), attempt, e);
                    if attempt < self.policy.max_retries
                        && !pause(self.policy.delay_after(attempt, &e), shutdown).await
                    {
                        info!("Shutdown requested, {} retry abandoned", part.label());
                        return Attempt::Interrupted;
                    }
                    last_error = Some(e);
                }
            }
        }

        Attempt::Failed(
            last_error.unwrap_or_else(|| Error::Other("No send attempt made".to_string())),
        )
    }

    async fn send_once(&self, part: Part<'_>) -> Result<(), Error> {
        let send = async {
            match part {
                Part::Text(text) => self.sink.send_text(text).await,
                Part::Image { url, caption } => self.sink.send_image(url, caption).await,
            }
        };
        match tokio::time::timeout(self.policy.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} send via {} exceeded {:?}",
                part.label(),
                self.sink.sink_name(),
                self.policy.send_timeout
            ))),
        }
    }
}
