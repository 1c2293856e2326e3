//! Poll engine
//!
//! The PollEngine is responsible for:
//! - Fetching the watched page via PageSource
//! - Parsing it into comment records
//! - Detecting comments that were not notified yet
//! - Delivering them through the NotificationDispatcher
//! - Persisting the seen set after every tick that changed it
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ PageSource  │─── FetchedPage ───┐
//! └─────────────┘                   │
//!                                   ▼
//!                          ┌──────────────┐
//!                          │  PollEngine  │── parse → detect
//!                          └──────────────┘
//!                                   │
//!         ┌─────────────────────────┼─────────────────────────┐
//!         │                         │                         │
//!         ▼                         ▼                         ▼
//! ┌─────────────┐         ┌──────────────────┐        ┌─────────────┐
//! │ StateStore  │         │    Dispatcher    │        │   Events    │
//! │ (persist)   │         │ (sink + retries) │        │  (notify)   │
//! └─────────────┘         └──────────────────┘        └─────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! `Idle → Fetching → Parsing → Detecting → Dispatching → Persisting → Idle`
//!
//! 1. Fetch the page (bounded by `fetch_timeout`); failure aborts the tick
//! 2. Parse; an empty result is "nothing new", never "everything deleted"
//! 3. Detect the records missing from the seen set, in page order
//! 4. Dispatch them one by one; every attempted id joins the seen set
//! 5. Persist; a failed save keeps the state dirty for the next tick
//!
//! Ticks never overlap: the next fetch starts only after the previous tick
//! has persisted.

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, InitialMode, WatchConfig};
use crate::detector;
use crate::dispatcher::{self, DeliveryOutcome, NotificationDispatcher, RetryPolicy};
use crate::error::{Error, Result};
use crate::parser::{CommentRecord, PageParser};
use crate::state::State;
use crate::traits::{FetchedPage, NotificationSink, PageSource, StateStore};

/// Headline of the startup snapshot notification
pub const STARTUP_TITLE: &str = "Latest comment at startup";

/// Events emitted by the PollEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        page_url: String,
        seen_count: usize,
    },

    /// Page fetch or tick failed; the engine waits and tries again
    TickFailed {
        error: String,
    },

    /// Page parsed and diffed against the seen set
    CommentsDetected {
        total: usize,
        new: usize,
    },

    /// First run in mark-seen mode: current comments recorded silently
    InitialSnapshot {
        marked: usize,
    },

    /// Startup notification sent (or attempted)
    StartupNotified {
        delivered: bool,
    },

    /// A comment was delivered
    CommentDelivered {
        comment_id: String,
        images_sent: usize,
    },

    /// A comment could not be fully delivered; it still counts as processed
    DeliveryFailed {
        comment_id: String,
        reason: String,
    },

    /// State could not be saved; retried on the next tick
    PersistFailed {
        error: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Records found on the page
    pub parsed: usize,

    /// Records not seen before
    pub new: usize,

    /// New records delivered completely
    pub delivered: usize,

    /// New records with at least one failed part
    pub failed: usize,

    /// Records recorded as seen without notification
    pub marked_seen: usize,

    /// Whether the startup notification went out during this tick
    pub startup_sent: bool,

    /// Whether the state was saved at the end of the tick
    pub persisted: bool,

    /// Error of a failed save, if any
    pub persist_error: Option<String>,

    /// Shutdown was requested before every new record was dispatched
    pub interrupted: bool,
}

/// Loop-owned mutable state
///
/// Created once per process by [`PollEngine::start_session`] and handed to
/// every tick. Nothing else reads or writes it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: State,
    dirty: bool,
    startup_done: bool,
}

impl Session {
    /// Wrap a loaded state
    pub fn new(state: State) -> Self {
        Self {
            state,
            dirty: false,
            startup_done: false,
        }
    }

    /// Current state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Whether the state changed since the last successful save
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Core poll engine
///
/// ## Lifecycle
///
/// 1. Create with [`PollEngine::new()`]
/// 2. Start with [`PollEngine::run()`]
/// 3. Engine runs until the shutdown channel flips to `true`
/// 4. Drop to cleanup
///
/// ## Threading
///
/// One engine drives one page. All work happens on the task calling
/// `run()`; the session is never shared.
pub struct PollEngine {
    /// Page source for fetching
    source: Box<dyn PageSource>,

    /// Parser bound to the page URL
    parser: PageParser,

    /// Formatting and delivery
    dispatcher: NotificationDispatcher,

    /// Durable seen set
    state_store: Box<dyn StateStore>,

    /// Page URL without fragment
    page_url: String,

    /// Engine settings
    config: EngineConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl PollEngine {
    /// Create a new poll engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn PageSource>,
        sink: Box<dyn NotificationSink>,
        state_store: Box<dyn StateStore>,
        config: WatchConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let page_url = config.page.base_url().to_string();
        let parser = PageParser::new(&page_url)?;
        let dispatcher =
            NotificationDispatcher::new(sink, RetryPolicy::from_config(&config.engine), &page_url)
                .with_title(config.engine.notification_title.clone())
                .with_image_delay(std::time::Duration::from_millis(
                    config.engine.image_send_delay_ms,
                ));

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            source,
            parser,
            dispatcher,
            state_store,
            page_url,
            config: config.engine,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The watched page URL
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// Load persisted state into a fresh session
    pub async fn start_session(&self) -> Session {
        let state = self.state_store.load().await;
        info!(
            "Loaded state: {} seen comment(s), last successful poll {:?}",
            state.seen.len(),
            state.last_successful_poll
        );
        Session::new(state)
    }

    /// Run the engine until `shutdown` becomes `true`
    ///
    /// Tick failures are logged and followed by the error delay; they never
    /// end the loop. A dropped shutdown sender also stops the engine.
    ///
    /// Fails only if state left unsaved by the last tick cannot be written
    /// on the way out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut session = self.start_session().await;

        self.emit_event(EngineEvent::Started {
            page_url: self.page_url.clone(),
            seen_count: session.state.seen.len(),
        });
        info!(
            "Watching {} every {}s via {} → {}",
            self.page_url,
            self.config.poll_interval_secs,
            self.source.source_name(),
            self.dispatcher.sink_name()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.tick(&mut session, Some(&shutdown)).await {
                Ok(report) if report.interrupted => break,
                Ok(_) => self.config.poll_interval(),
                Err(e) => {
                    error!("Tick failed: {}", e);
                    self.emit_event(EngineEvent::TickFailed {
                        error: e.to_string(),
                    });
                    self.config.error_delay()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        let flushed = if session.dirty {
            self.persist(&mut session).await
        } else {
            Ok(())
        };

        info!("Shutdown signal received, engine stopped");
        self.emit_event(EngineEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        flushed
    }

    /// Run a single tick
    ///
    /// Fails only if the page could not be fetched. Delivery and persistence
    /// problems are reported in the returned [`TickReport`].
    pub async fn run_once(&self, session: &mut Session) -> Result<TickReport> {
        self.tick(session, None).await
    }

    async fn tick(
        &self,
        session: &mut Session,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Fetching
        let page = match self.fetch().await {
            Ok(page) => page,
            Err(e) => {
                if session.dirty {
                    let _ = self.persist(session).await;
                }
                return Err(e);
            }
        };
        session.state.last_successful_poll = Some(Utc::now());

        // Parsing
        let records = self.parser.parse(&page.body);
        report.parsed = records.len();

        let mut snapshot_id = None;
        if self.config.startup.enabled && !session.startup_done {
            session.startup_done = true;
            let (sent, snapshot) = self.send_startup(&records, shutdown).await;
            report.startup_sent = sent;
            snapshot_id = snapshot;
        }

        if records.is_empty() {
            info!("No comments found on {}", self.page_url);
            self.finish(session, &mut report).await;
            return Ok(report);
        }

        // First run in mark-seen mode
        if self.config.initial_mode == InitialMode::MarkSeen && session.state.seen.is_empty() {
            let marked = detector::mark_all_seen(&records, &mut session.state.seen);
            session.dirty = true;
            report.marked_seen = marked;
            info!("Marked {} existing comment(s) as seen without notifying", marked);
            self.emit_event(EngineEvent::InitialSnapshot { marked });
            self.finish(session, &mut report).await;
            return Ok(report);
        }

        // Detecting
        let mut new_records = detector::detect(&records, &session.state.seen);
        report.new = new_records.len();

        // The startup snapshot already carried this record
        if let Some(id) = snapshot_id
            && new_records.iter().any(|r| r.id == id)
        {
            debug!("Comment {} covered by the startup snapshot", id);
            new_records.retain(|r| r.id != id);
            session.state.seen.insert(id.as_str());
            session.dirty = true;
        }
        self.emit_event(EngineEvent::CommentsDetected {
            total: records.len(),
            new: new_records.len(),
        });

        if new_records.is_empty() {
            debug!("No new comments pending ({} on page)", records.len());
            self.finish(session, &mut report).await;
            return Ok(report);
        }
        info!("{} new comment(s) on {}", new_records.len(), self.page_url);

        // Dispatching
        let mut images_sent = 0;
        for record in &new_records {
            if dispatcher::stop_requested(shutdown) {
                info!("Shutdown requested, stopping dispatch");
                report.interrupted = true;
                break;
            }

            let title = self.dispatcher.title();
            match self.dispatcher.dispatch_until(record, title, shutdown).await {
                DeliveryOutcome::Delivered { images_sent: sent } => {
                    report.delivered += 1;
                    images_sent += sent;
                    self.emit_event(EngineEvent::CommentDelivered {
                        comment_id: record.id.clone(),
                        images_sent: sent,
                    });
                }
                DeliveryOutcome::Failed {
                    reason,
                    images_sent: sent,
                } => {
                    report.failed += 1;
                    images_sent += sent;
                    warn!("Comment {} only partially delivered: {}", record.id, reason);
                    self.emit_event(EngineEvent::DeliveryFailed {
                        comment_id: record.id.clone(),
                        reason,
                    });
                }
                outcome @ DeliveryOutcome::Interrupted { .. } => {
                    info!("Shutdown requested while delivering comment {}", record.id);
                    report.interrupted = true;
                    // Nothing went out: the comment stays new for the next run
                    if outcome.anything_sent() {
                        report.failed += 1;
                        images_sent += outcome.images_sent();
                        session.state.seen.insert(record.id.as_str());
                        session.dirty = true;
                    }
                    break;
                }
            }

            session.state.seen.insert(record.id.as_str());
            session.dirty = true;
        }

        info!(
            "Processed {} new comment(s) (delivered: {}, failed: {}, images sent: {})",
            report.delivered + report.failed,
            report.delivered,
            report.failed,
            images_sent
        );

        // Persisting
        self.finish(session, &mut report).await;
        Ok(report)
    }

    /// Fetch the page, mapping timeouts and non-2xx status to errors
    async fn fetch(&self) -> Result<FetchedPage> {
        let timeout = self.config.fetch_timeout();
        let page = tokio::time::timeout(timeout, self.source.fetch(&self.page_url))
            .await
            .map_err(|_| {
                Error::timeout(format!("Fetching {} exceeded {:?}", self.page_url, timeout))
            })??;

        if !page.is_success() {
            return Err(Error::fetch(format!(
                "HTTP {} from {}",
                page.status, page.final_url
            )));
        }
        debug!("Fetched {} bytes from {}", page.body.len(), page.final_url);
        Ok(page)
    }

    /// Liveness message plus the most recent record
    ///
    /// Returns whether everything was delivered and the id of the snapshot
    /// record if it reached the sink.
    async fn send_startup(
        &self,
        records: &[CommentRecord],
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> (bool, Option<String>) {
        let message = self
            .config
            .startup
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Monitoring started: {}", self.page_url));

        let image_url = self.config.startup.image_url.as_deref();
        let mut delivered = self
            .dispatcher
            .announce_until(&message, image_url, shutdown)
            .await
            .is_delivered();

        let mut snapshot_id = None;
        match records.last() {
            Some(latest) => {
                let outcome = self
                    .dispatcher
                    .dispatch_until(latest, STARTUP_TITLE, shutdown)
                    .await;
                delivered &= outcome.is_delivered();
                if outcome.anything_sent() {
                    snapshot_id = Some(latest.id.clone());
                }
            }
            None => info!("No comments available for the startup snapshot"),
        }

        if delivered {
            info!("Startup notification sent");
        } else {
            warn!("Startup notification not fully delivered");
        }
        self.emit_event(EngineEvent::StartupNotified { delivered });
        (delivered, snapshot_id)
    }

    /// Persist if the tick changed anything (or an earlier save failed)
    async fn finish(&self, session: &mut Session, report: &mut TickReport) {
        if !session.dirty {
            return;
        }
        match self.persist(session).await {
            Ok(()) => report.persisted = true,
            Err(e) => report.persist_error = Some(e.to_string()),
        }
    }

    async fn persist(&self, session: &mut Session) -> Result<()> {
        match self.state_store.save(&mut session.state).await {
            Ok(()) => {
                session.dirty = false;
                debug!("State saved ({} seen ids)", session.state.seen.len());
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to save state, already notified comments may be sent again: {}",
                    e
                );
                self.emit_event(EngineEvent::PersistFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_clone_eq() {
        let event = EngineEvent::CommentDelivered {
            comment_id: "4711".to_string(),
            images_sent: 2,
        };
        assert_eq!(event.clone(), event);
    }

    #[test]
    fn test_session_starts_clean() {
        let session = Session::new(State::new());
        assert!(!session.is_dirty());
        assert!(session.state().seen.is_empty());
    }
}
