//! Configuration types for the threadwatch system
//!
//! This module defines all configuration structures used throughout the crate.
//! The core treats every value as an opaque input; loading them (from the
//! environment, a file, ...) is the embedding application's job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main threadwatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// The watched page
    pub page: PageConfig,

    /// Notification sink configuration
    pub sink: SinkConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl WatchConfig {
    /// Create a configuration for a page and sink with default engine settings
    pub fn new(page_url: impl Into<String>, sink: SinkConfig) -> Self {
        Self {
            page: PageConfig::new(page_url),
            sink,
            state_store: StateStoreConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.page.validate()?;
        self.sink.validate()?;
        self.state_store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// The watched page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    /// Thread URL; a `#fragment` is ignored for fetching and link building
    pub url: String,

    /// How the page is fetched
    #[serde(default)]
    pub source: PageSourceConfig,
}

impl PageConfig {
    /// Create a page configuration using the default HTTP source
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: PageSourceConfig::default(),
        }
    }

    /// Page URL without any fragment
    pub fn base_url(&self) -> &str {
        self.url.split('#').next().unwrap_or(&self.url).trim()
    }

    /// Validate the page configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let base = self.base_url();
        if base.is_empty() {
            return Err(crate::Error::config("Page URL cannot be empty"));
        }
        let parsed = url::Url::parse(base)
            .map_err(|e| crate::Error::config(format!("Invalid page URL '{}': {}", base, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(crate::Error::config(format!(
                "Page URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        self.source.validate()
    }
}

/// Page source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageSourceConfig {
    /// Plain HTTP GET
    Http {
        /// User-Agent header override
        #[serde(default)]
        user_agent: Option<String>,
        /// Accept-Language header override
        #[serde(default)]
        accept_language: Option<String>,
    },

    /// Custom page source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl PageSourceConfig {
    /// Validate the page source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            PageSourceConfig::Http { .. } => Ok(()),
            PageSourceConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom page source factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom page source config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the source type name
    pub fn type_name(&self) -> &str {
        match self {
            PageSourceConfig::Http { .. } => "http",
            PageSourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for PageSourceConfig {
    fn default() -> Self {
        PageSourceConfig::Http {
            user_agent: None,
            accept_language: None,
        }
    }
}

/// Notification sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Telegram Bot API
    Telegram {
        /// Bot token
        bot_token: String,
        /// Destination chat
        chat_id: String,
        /// API base override (defaults to the public Bot API)
        #[serde(default)]
        api_base: Option<String>,
    },

    /// Custom sink
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SinkConfig {
    /// Validate the sink configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SinkConfig::Telegram {
                bot_token, chat_id, ..
            } => {
                if bot_token.is_empty() {
                    return Err(crate::Error::config("Telegram bot token cannot be empty"));
                }
                if chat_id.is_empty() {
                    return Err(crate::Error::config("Telegram chat id cannot be empty"));
                }
                Ok(())
            }
            SinkConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom sink factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom sink config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the sink type name
    pub fn type_name(&self) -> &str {
        match self {
            SinkConfig::Telegram { .. } => "telegram",
            SinkConfig::Custom { factory, .. } => factory,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    Memory,
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig::File {
            path: "state.json".to_string(),
        }
    }
}

/// What to do with the comments already on the page when nothing has been
/// seen yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialMode {
    /// Treat every comment as new and notify about it
    #[default]
    Notify,
    /// Record every current comment as seen without notifying
    MarkSeen,
}

/// One-time liveness notification sent on the first successful fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Whether to send it at all
    #[serde(default)]
    pub enabled: bool,

    /// Message text; defaults to "Monitoring started: <url>"
    #[serde(default)]
    pub message: Option<String>,

    /// Optional image sent alongside the message
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between polls (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound for the wait after a failed tick (in seconds)
    ///
    /// After a failure the loop waits `min(cap, 2 * poll_interval)`.
    #[serde(default = "default_error_backoff_cap_secs")]
    pub error_backoff_cap_secs: u64,

    /// Maximum number of retry attempts per send
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First backoff delay (in milliseconds), doubled on every retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling (in milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Deadline for a single send (in seconds)
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Deadline for the page fetch (in seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Pause between consecutive image sends (in milliseconds)
    #[serde(default = "default_image_send_delay_ms")]
    pub image_send_delay_ms: u64,

    /// Maximum number of remembered comment ids (0 = unlimited)
    ///
    /// Oldest ids are evicted first. An evicted id that shows up again is
    /// treated as new.
    #[serde(default = "default_seen_limit")]
    pub seen_limit: usize,

    /// Behaviour on the very first run
    #[serde(default)]
    pub initial_mode: InitialMode,

    /// Startup liveness notification
    #[serde(default)]
    pub startup: StartupConfig,

    /// Headline of regular notifications
    #[serde(default = "default_notification_title")]
    pub notification_title: String,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Delay between successful ticks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay after a failed tick
    pub fn error_delay(&self) -> Duration {
        let doubled = self.poll_interval_secs.saturating_mul(2);
        Duration::from_secs(doubled.min(self.error_backoff_cap_secs))
    }

    /// Deadline for one send
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Deadline for the page fetch
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.send_timeout_secs == 0 {
            return Err(crate::Error::config("Send timeout must be > 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(crate::Error::config("Fetch timeout must be > 0"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(crate::Error::config(
                "Retry base delay cannot exceed the retry max delay",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_cap_secs: default_error_backoff_cap_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            image_send_delay_ms: default_image_send_delay_ms(),
            seen_limit: default_seen_limit(),
            initial_mode: InitialMode::default(),
            startup: StartupConfig::default(),
            notification_title: default_notification_title(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_error_backoff_cap_secs() -> u64 {
    180
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_image_send_delay_ms() -> u64 {
    700
}

fn default_seen_limit() -> usize {
    5000
}

fn default_notification_title() -> String {
    "New comment".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}
