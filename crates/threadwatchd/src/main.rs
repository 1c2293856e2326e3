// # threadwatchd - Comment Watch Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add parsing, detection, formatting or retry logic here
// - All watch logic MUST be in threadwatch-core
// - Configuration is via environment variables ONLY
//
// The threadwatchd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime and logging
// 3. Registering page sources and notification sinks
// 4. Starting the poll engine and turning signals into a shutdown request
//
// ## Configuration
//
// ### Page
// - `THREADWATCH_PAGE_URL`: Thread URL to watch (required)
// - `THREADWATCH_USER_AGENT`: User-Agent override
// - `THREADWATCH_ACCEPT_LANGUAGE`: Accept-Language override
//
// ### Telegram
// - `THREADWATCH_TELEGRAM_BOT_TOKEN`: Bot token (required)
// - `THREADWATCH_TELEGRAM_CHAT_ID`: Destination chat (required)
// - `THREADWATCH_TELEGRAM_API_BASE`: Bot API server override
//
// ### State Store
// - `THREADWATCH_STATE_STORE_TYPE`: file (default) or memory
// - `THREADWATCH_STATE_PATH`: Path to the state file (default: state.json)
// - `THREADWATCH_SEEN_LIMIT`: Remembered comment ids (default: 5000, 0 = unbounded)
//
// ### Engine
// - `THREADWATCH_POLL_SECS`: Seconds between polls (default: 60)
// - `THREADWATCH_MAX_RETRIES`: Extra send attempts per message (default: 3)
// - `THREADWATCH_INITIAL_MODE`: notify (default) or mark_seen
// - `THREADWATCH_STARTUP_NOTIFY`: Send a startup notification (true/false)
// - `THREADWATCH_STARTUP_MESSAGE`: Startup message text
// - `THREADWATCH_STARTUP_IMAGE_URL`: Image sent with the startup message
// - `THREADWATCH_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export THREADWATCH_PAGE_URL=https://forum.example.com/threads/123
// export THREADWATCH_TELEGRAM_BOT_TOKEN=123456:your_token
// export THREADWATCH_TELEGRAM_CHAT_ID=-1001234567890
// export THREADWATCH_STATE_PATH=/var/lib/threadwatch/state.json
//
// threadwatchd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use threadwatch_core::{
    ComponentRegistry, EngineEvent, InitialMode, PageSourceConfig, PollEngine, SinkConfig,
    StartupConfig, StateStoreConfig, WatchConfig,
};
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum WatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<WatchExitCode> for ExitCode {
    fn from(code: WatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    page_url: String,
    user_agent: Option<String>,
    accept_language: Option<String>,
    bot_token: String,
    chat_id: String,
    api_base: Option<String>,
    state_store_type: String,
    state_path: String,
    seen_limit: Option<usize>,
    poll_secs: Option<u64>,
    max_retries: Option<usize>,
    initial_mode: String,
    startup_notify: bool,
    startup_message: Option<String>,
    startup_image_url: Option<String>,
    log_level: String,
}

/// Read an optional variable; empty counts as unset
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an optional numeric variable
fn parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number, got '{}': {}", name, raw, e)),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false, got '{}'", name, raw),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            page_url: optional("THREADWATCH_PAGE_URL").unwrap_or_default(),
            user_agent: optional("THREADWATCH_USER_AGENT"),
            accept_language: optional("THREADWATCH_ACCEPT_LANGUAGE"),
            bot_token: optional("THREADWATCH_TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            chat_id: optional("THREADWATCH_TELEGRAM_CHAT_ID").unwrap_or_default(),
            api_base: optional("THREADWATCH_TELEGRAM_API_BASE"),
            state_store_type: optional("THREADWATCH_STATE_STORE_TYPE")
                .unwrap_or_else(|| "file".to_string()),
            state_path: optional("THREADWATCH_STATE_PATH")
                .unwrap_or_else(|| "state.json".to_string()),
            seen_limit: parsed("THREADWATCH_SEEN_LIMIT")?,
            poll_secs: parsed("THREADWATCH_POLL_SECS")?,
            max_retries: parsed("THREADWATCH_MAX_RETRIES")?,
            initial_mode: optional("THREADWATCH_INITIAL_MODE")
                .unwrap_or_else(|| "notify".to_string()),
            startup_notify: optional("THREADWATCH_STARTUP_NOTIFY")
                .map(|raw| parse_bool("THREADWATCH_STARTUP_NOTIFY", &raw))
                .transpose()?
                .unwrap_or(false),
            startup_message: optional("THREADWATCH_STARTUP_MESSAGE"),
            startup_image_url: optional("THREADWATCH_STARTUP_IMAGE_URL"),
            log_level: optional("THREADWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the values only the daemon knows about
    ///
    /// Everything that maps onto `WatchConfig` is checked again by
    /// `WatchConfig::validate()`.
    fn validate(&self) -> Result<()> {
        if self.page_url.is_empty() {
            anyhow::bail!(
                "THREADWATCH_PAGE_URL is required. \
                Set it via: export THREADWATCH_PAGE_URL=https://forum.example.com/threads/123"
            );
        }

        if self.bot_token.is_empty() {
            anyhow::bail!(
                "THREADWATCH_TELEGRAM_BOT_TOKEN is required. \
                Set it via: export THREADWATCH_TELEGRAM_BOT_TOKEN=123456:your_token"
            );
        }

        // Bot tokens look like "<bot id>:<secret>"
        if !self.bot_token.contains(':') {
            anyhow::bail!(
                "THREADWATCH_TELEGRAM_BOT_TOKEN does not look like a bot token \
                (expected '<id>:<secret>' as issued by @BotFather)"
            );
        }

        if self.chat_id.is_empty() {
            anyhow::bail!("THREADWATCH_TELEGRAM_CHAT_ID is required");
        }

        match self.state_store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "THREADWATCH_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.state_store_type
            ),
        }

        match self.initial_mode.as_str() {
            "notify" | "mark_seen" => {}
            _ => anyhow::bail!(
                "THREADWATCH_INITIAL_MODE '{}' is not valid. Valid modes: notify, mark_seen",
                self.initial_mode
            ),
        }

        if let Some(poll) = self.poll_secs
            && !(1..=86_400).contains(&poll)
        {
            anyhow::bail!(
                "THREADWATCH_POLL_SECS must be between 1 and 86400 seconds. Got: {}",
                poll
            );
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            anyhow::bail!(
                "THREADWATCH_MAX_RETRIES must be between 0 and 10. Got: {}",
                max_retries
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "THREADWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core configuration
    fn to_watch_config(&self) -> Result<WatchConfig> {
        let sink = SinkConfig::Telegram {
            bot_token: self.bot_token.clone(),
            chat_id: self.chat_id.clone(),
            api_base: self.api_base.clone(),
        };

        let mut config = WatchConfig::new(self.page_url.clone(), sink);
        config.page.source = PageSourceConfig::Http {
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
        };
        config.state_store = match self.state_store_type.as_str() {
            "memory" => StateStoreConfig::Memory,
            _ => StateStoreConfig::File {
                path: self.state_path.clone(),
            },
        };

        let engine = &mut config.engine;
        if let Some(poll) = self.poll_secs {
            engine.poll_interval_secs = poll;
        }
        if let Some(max_retries) = self.max_retries {
            engine.max_retries = max_retries;
        }
        if let Some(limit) = self.seen_limit {
            engine.seen_limit = limit;
        }
        engine.initial_mode = match self.initial_mode.as_str() {
            "mark_seen" => InitialMode::MarkSeen,
            _ => InitialMode::Notify,
        };
        engine.startup = StartupConfig {
            enabled: self.startup_notify,
            message: self.startup_message.clone(),
            image_url: self.startup_image_url.clone(),
        };

        config.validate().context("Invalid watch configuration")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return WatchExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return WatchExitCode::ConfigError.into();
    }

    let watch_config = match config.to_watch_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return WatchExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WatchExitCode::ConfigError.into();
    }

    info!("Starting threadwatchd daemon");
    info!("Watching {}", watch_config.page.url);

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WatchExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(watch_config)).into()
}

/// Run the daemon
async fn run_daemon(config: WatchConfig) -> WatchExitCode {
    let registry = ComponentRegistry::new();

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP page source");
        threadwatch_source_http::register(&registry);
    }

    #[cfg(feature = "telegram")]
    {
        info!("Registering Telegram sink");
        threadwatch_sink_telegram::register(&registry);
    }

    // Startup failures (unknown plugin, unwritable state directory) are fatal
    let (engine, events) = match build_engine(&registry, config).await {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return WatchExitCode::ConfigError;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });
    let logger = tokio::spawn(log_events(events));

    info!("Starting poll engine");
    let result = engine.run(shutdown_rx).await;

    signals.abort();
    // Dropping the engine closes the event channel and ends the logger
    drop(engine);
    let _ = logger.await;

    match result {
        Ok(()) => {
            info!("Shutting down daemon");
            WatchExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Engine error: {}", e);
            WatchExitCode::RuntimeError
        }
    }
}

async fn build_engine(
    registry: &ComponentRegistry,
    config: WatchConfig,
) -> Result<(PollEngine, tokio::sync::mpsc::Receiver<EngineEvent>)> {
    let source = registry
        .create_source(&config.page.source)
        .context("Failed to create page source")?;
    let sink = registry
        .create_sink(&config.sink)
        .context("Failed to create notification sink")?;
    let state_store = registry
        .create_state_store(&config.state_store, config.engine.seen_limit)
        .await
        .context("Failed to open state store")?;

    PollEngine::new(source, sink, state_store, config).context("Failed to create poll engine")
}

/// Mirror engine events into the log
async fn log_events(mut events: tokio::sync::mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Started {
                page_url,
                seen_count,
            } => info!("Engine started for {} ({} known comments)", page_url, seen_count),
            EngineEvent::TickFailed { error } => warn!("Poll failed: {}", error),
            EngineEvent::CommentsDetected { total, new } if new > 0 => {
                info!("{} new comment(s) out of {}", new, total)
            }
            EngineEvent::CommentsDetected { .. } => {}
            EngineEvent::InitialSnapshot { marked } => {
                info!("Marked {} existing comment(s) as seen", marked)
            }
            EngineEvent::StartupNotified { delivered } => {
                info!("Startup notification sent (delivered: {})", delivered)
            }
            EngineEvent::CommentDelivered {
                comment_id,
                images_sent,
            } => info!("Delivered comment {} ({} image(s))", comment_id, images_sent),
            EngineEvent::DeliveryFailed { comment_id, reason } => {
                warn!("Comment {} not fully delivered: {}", comment_id, reason)
            }
            EngineEvent::PersistFailed { error } => warn!("State not saved: {}", error),
            EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
