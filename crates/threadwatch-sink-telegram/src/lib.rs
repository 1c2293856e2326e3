// # Telegram Notification Sink
//
// This crate provides a Telegram Bot API sink for the threadwatch system.
//
// ## Implementation Status
//
// - ✅ Makes one HTTP request per send (as required by architectural constraints)
// - ✅ Full error propagation to the dispatcher (dispatcher handles retries and backoff)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error handling for HTTP status codes (400, 401, 403, 429, 5xx)
// - ✅ Honours the Bot API `retry_after` hint on 429
// - ✅ HTML parse mode for text and captions
// - ❌ NO retry logic (owned by NotificationDispatcher)
// - ❌ NO backoff logic (owned by NotificationDispatcher)
// - ❌ NO message formatting (owned by NotificationDispatcher)
// - ❌ NO background tasks
//
// ### Trust Level: Untrusted (Notification Sink)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS calls to the Bot API only
// - ✅ Parse Bot API responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic
// - ❌ Access the state store
//
// ## Security Requirements
//
// - The bot token is part of every request URL: it NEVER appears in logs,
//   in `Debug` output or in error messages
// - The token MUST be provided via environment variables only
//
// ## API Reference
//
// - sendMessage: POST `/bot<token>/sendMessage`
// - sendPhoto: POST `/bot<token>/sendPhoto` (photo given by URL)

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use threadwatch_core::ComponentRegistry;
use threadwatch_core::config::SinkConfig;
use threadwatch_core::traits::{NotificationSink, NotificationSinkFactory};
use threadwatch_core::{Error, Result};

/// Public Bot API endpoint
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const SINK_NAME: &str = "telegram";

/// Telegram Bot API sink
///
/// # Trust Level: Untrusted
///
/// Isolated, stateless and single-shot. Every remote failure is mapped into
/// the core error taxonomy and returned; the dispatcher decides what to do.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the bot token.
pub struct TelegramSink {
    /// Bot token
    /// ⚠️ NEVER log this value
    bot_token: String,

    /// Destination chat (numeric id or `@channel`)
    chat_id: String,

    /// API base URL without trailing slash
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the bot token
impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("bot_token", &"<REDACTED>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramSink {
    /// Create a new Telegram sink
    ///
    /// # Parameters
    ///
    /// - `bot_token`: Token issued by @BotFather
    /// - `chat_id`: Destination chat
    /// - `api_base`: Optional Bot API server (self-hosted or test server)
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        api_base: Option<String>,
    ) -> Result<Self> {
        let bot_token = bot_token.into();
        let chat_id = chat_id.into();
        if bot_token.trim().is_empty() {
            return Err(Error::config("Telegram bot token cannot be empty"));
        }
        if chat_id.trim().is_empty() {
            return Err(Error::config("Telegram chat id cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let api_base = api_base
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bot_token,
            chat_id,
            api_base,
            client,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// POST one Bot API call and classify the outcome
    async fn call(&self, method: &str, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(method, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(method, e))?;

        classify_response(method, status, &body)
    }
}

/// Map a reqwest error without leaking the token-bearing URL
fn transport_error(method: &str, e: reqwest::Error) -> Error {
    let timed_out = e.is_timeout();
    let e = e.without_url();
    if timed_out {
        Error::timeout(format!("Telegram {} timed out", method))
    } else {
        Error::http(format!("Telegram {} request failed: {}", method, e))
    }
}

/// Turn a Bot API response into `Ok(())` or a classified error
///
/// - 2xx with `"ok": true` → success
/// - 429 → rate limited, with `parameters.retry_after` when present
/// - 5xx → transient HTTP error
/// - anything else (bad payload, unknown chat, unusable photo) → rejected
pub fn classify_response(method: &str, status: u16, body: &str) -> Result<()> {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let description = json
        .as_ref()
        .and_then(|j| j.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("no description")
        .to_string();

    match status {
        200..=299 => {
            let ok = json
                .as_ref()
                .and_then(|j| j.get("ok"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if ok {
                tracing::trace!("Telegram {} succeeded", method);
                Ok(())
            } else {
                Err(Error::rejected(format!(
                    "Telegram {} not accepted: {}",
                    method, description
                )))
            }
        }
        429 => {
            let retry_after = json
                .as_ref()
                .and_then(|j| j.pointer("/parameters/retry_after"))
                .and_then(Value::as_u64)
                .map(Duration::from_secs);
            Err(Error::rate_limited(
                format!("Telegram {} rate limited: {}", method, description),
                retry_after,
            ))
        }
        401 | 403 => Err(Error::rejected(format!(
            "Telegram {} unauthorized (check bot token and chat membership): {}",
            method, description
        ))),
        500..=599 => Err(Error::http(format!(
            "Telegram server error (transient) on {}: HTTP {} - {}",
            method, status, description
        ))),
        _ => Err(Error::rejected(format!(
            "Telegram {} failed: HTTP {} - {}",
            method, status, description
        ))),
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send_text(&self, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": false,
        });
        self.call("sendMessage", &payload).await
    }

    async fn send_image(&self, image_url: &str, caption: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "photo": image_url,
            "caption": caption,
            "parse_mode": "HTML",
        });
        self.call("sendPhoto", &payload).await
    }

    fn sink_name(&self) -> &'static str {
        SINK_NAME
    }
}

/// Factory for creating Telegram sinks
pub struct TelegramFactory;

impl NotificationSinkFactory for TelegramFactory {
    fn create(&self, config: &SinkConfig) -> Result<Box<dyn NotificationSink>> {
        match config {
            SinkConfig::Telegram {
                bot_token,
                chat_id,
                api_base,
            } => Ok(Box::new(TelegramSink::new(
                bot_token.clone(),
                chat_id.clone(),
                api_base.clone(),
            )?)),
            _ => Err(Error::config("Invalid config for Telegram sink")),
        }
    }
}

/// Register the Telegram sink with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_sink(SINK_NAME, Box::new(TelegramFactory));
}
