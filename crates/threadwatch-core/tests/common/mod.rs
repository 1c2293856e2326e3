//! Test doubles and common utilities for architecture contract tests
//!
//! The doubles share their counters through `Arc`, so a test can keep a
//! clone while the engine owns the boxed original.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use threadwatch_core::config::{EngineConfig, SinkConfig, WatchConfig};
use threadwatch_core::error::{Error, Result};
use threadwatch_core::state::{MemoryStateStore, State};
use threadwatch_core::traits::{FetchedPage, NotificationSink, PageSource, StateStore};
use tokio::sync::watch;

pub const PAGE_URL: &str = "https://www.example.com/deals/widget-deal-2231";

/// Render a thread page with one `<article>` per `(id, text)`
pub fn thread_page(comments: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body><section class=\"comments\">");
    for (id, text) in comments {
        html.push_str(&format!(
            "<article data-comment-id=\"{id}\"><span class=\"user\">user{id}</span>\
             <div class=\"comment__body\"><div class=\"content\">{text}</div></div></article>"
        ));
    }
    html.push_str("</section></body></html>");
    html
}

/// A page with comments that carry images
pub fn thread_page_with_images(comments: &[(&str, Vec<&str>)]) -> String {
    let mut html = String::from("<html><body>");
    for (id, images) in comments {
        html.push_str(&format!("<article data-comment-id=\"{id}\"><div class=\"content\">look"));
        for src in images.iter() {
            html.push_str(&format!("<img src=\"{src}\">"));
        }
        html.push_str("</div></article>");
    }
    html.push_str("</body></html>");
    html
}

/// Engine configuration tuned for fast tests
pub fn test_config() -> WatchConfig {
    let mut config = WatchConfig::new(
        PAGE_URL,
        SinkConfig::Custom {
            factory: "recording".to_string(),
            config: serde_json::json!({}),
        },
    );
    config.engine = EngineConfig {
        poll_interval_secs: 1,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        send_timeout_secs: 2,
        fetch_timeout_secs: 2,
        image_send_delay_ms: 0,
        event_channel_capacity: 100,
        ..EngineConfig::default()
    };
    config
}

/// A page source that replays scripted responses
///
/// Each fetch takes the next scripted response; once the script is used up,
/// the current page is served with status 200.
#[derive(Clone, Default)]
pub struct ScriptedPageSource {
    page: Arc<Mutex<String>>,
    script: Arc<Mutex<VecDeque<Result<FetchedPage>>>>,
    fetch_count: Arc<AtomicUsize>,
    delay: Option<std::time::Duration>,
}

impl ScriptedPageSource {
    /// Serve `html` on every fetch
    pub fn new(html: impl Into<String>) -> Self {
        let source = Self::default();
        source.set_page(html);
        source
    }

    /// Sleep `delay` before answering
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the page served from now on
    pub fn set_page(&self, html: impl Into<String>) {
        *self.page.lock().unwrap() = html.into();
    }

    /// Queue a one-off response ahead of the regular page
    pub fn push_response(&self, response: Result<FetchedPage>) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Get the number of times fetch() was called
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for ScriptedPageSource {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(FetchedPage::new(self.page.lock().unwrap().clone(), 200, url)),
        }
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// One call received by the recording sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Image { url: String, caption: String },
}

impl Sent {
    pub fn text(&self) -> Option<&str> {
        match self {
            Sent::Text(text) => Some(text),
            Sent::Image { .. } => None,
        }
    }
}

/// A sink that records every call and can fail on demand
///
/// Every call, successful or not, is recorded as an attempt. Failures are
/// taken from the script in order; when the script is empty, calls succeed.
#[derive(Clone, Default)]
pub struct RecordingSink {
    attempts: Arc<Mutex<Vec<Sent>>>,
    delivered: Arc<Mutex<Vec<Sent>>>,
    script: Arc<Mutex<VecDeque<Result<()>>>>,
    shutdown_after_texts: Option<(usize, Arc<watch::Sender<bool>>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for the next calls
    pub fn push_results(&self, results: impl IntoIterator<Item = Result<()>>) {
        self.script.lock().unwrap().extend(results);
    }

    /// Flip `shutdown` to `true` once `count` texts were delivered
    pub fn with_shutdown_after(mut self, count: usize, shutdown: Arc<watch::Sender<bool>>) -> Self {
        self.shutdown_after_texts = Some((count, shutdown));
        self
    }

    /// Every call made, including failed ones
    pub fn attempts(&self) -> Vec<Sent> {
        self.attempts.lock().unwrap().clone()
    }

    /// Calls that succeeded
    pub fn delivered(&self) -> Vec<Sent> {
        self.delivered.lock().unwrap().clone()
    }

    /// Successfully delivered text messages
    pub fn delivered_texts(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .filter_map(|s| s.text().map(str::to_string))
            .collect()
    }

    /// Delivered texts that are regular notifications for comment `id`
    pub fn notifications_for(&self, id: &str) -> usize {
        let anchor = format!("#comment-{}\"", id);
        self.delivered_texts()
            .iter()
            .filter(|t| t.starts_with("<b>New comment</b>") && t.contains(&anchor))
            .count()
    }

    /// Comment ids of delivered regular notifications, in order
    pub fn notified_ids(&self) -> Vec<String> {
        self.delivered_texts()
            .iter()
            .filter(|t| t.starts_with("<b>New comment</b>"))
            .filter_map(|t| {
                let start = t.find("#comment-")? + "#comment-".len();
                let end = t[start..].find('"')? + start;
                Some(t[start..end].to_string())
            })
            .collect()
    }

    fn record(&self, call: Sent) -> Result<()> {
        self.attempts.lock().unwrap().push(call.clone());
        let result = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            let is_text = matches!(call, Sent::Text(_));
            self.delivered.lock().unwrap().push(call);
            if let (true, Some((count, shutdown))) = (is_text, &self.shutdown_after_texts) {
                if self.delivered_texts().len() >= *count {
                    let _ = shutdown.send(true);
                }
            }
        }
        result
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.record(Sent::Text(text.to_string()))
    }

    async fn send_image(&self, image_url: &str, caption: &str) -> Result<()> {
        self.record(Sent::Image {
            url: image_url.to_string(),
            caption: caption.to_string(),
        })
    }

    fn sink_name(&self) -> &'static str {
        "recording"
    }
}

/// A state store whose first `failures` saves fail
#[derive(Clone, Default)]
pub struct FlakyStateStore {
    inner: MemoryStateStore,
    failures: Arc<AtomicUsize>,
    save_attempts: Arc<AtomicUsize>,
}

impl FlakyStateStore {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(failures)),
            ..Self::default()
        }
    }

    /// Get the number of times save() was called
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// State as last saved successfully
    pub async fn saved(&self) -> State {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl StateStore for FlakyStateStore {
    async fn load(&self) -> State {
        self.inner.load().await
    }

    async fn save(&self, state: &mut State) -> Result<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::state_store("disk full"));
        }
        self.inner.save(state).await
    }
}
