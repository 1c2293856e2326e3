//! Architectural Contract Test: Change Detection
//!
//! This test verifies the exactly-once notification guarantee.
//!
//! Constraints verified:
//! - Only comments missing from the seen set are notified
//! - Notifications follow page order
//! - An unchanged page produces no notifications
//! - An empty page never touches the seen set
//! - Mark-seen mode starts monitoring without notifying
//! - The startup notification is sent regardless of the seen set
//! - The startup snapshot is not notified a second time as a new comment
//!
//! If this test fails, users receive duplicate or missing notifications.

mod common;

use common::*;
use threadwatch_core::config::InitialMode;
use threadwatch_core::state::MemoryStateStore;
use threadwatch_core::{EngineEvent, PollEngine};

fn engine_with(
    source: &ScriptedPageSource,
    sink: &RecordingSink,
    store: &MemoryStateStore,
    config: threadwatch_core::WatchConfig,
) -> (PollEngine, tokio::sync::mpsc::Receiver<EngineEvent>) {
    PollEngine::new(
        Box::new(source.clone()),
        Box::new(sink.clone()),
        Box::new(store.clone()),
        config,
    )
    .expect("engine construction succeeds")
}

#[tokio::test]
async fn new_comments_are_notified_once_in_page_order() {
    // Tick 1: [A, B, C] with an empty seen set → all three, in order
    let source = ScriptedPageSource::new(thread_page(&[("101", "A"), ("102", "B"), ("103", "C")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let (engine, _events) = engine_with(&source, &sink, &store, test_config());

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.new, 3);
    assert_eq!(report.delivered, 3);
    assert!(report.persisted);
    assert_eq!(sink.notified_ids(), vec!["101", "102", "103"]);

    let saved = store.snapshot().await;
    assert_eq!(saved.seen.iter().collect::<Vec<_>>(), vec!["101", "102", "103"]);
    assert!(saved.last_successful_poll.is_some());

    // Tick 2: [A, B, C, D] → only D
    source.set_page(thread_page(&[("101", "A"), ("102", "B"), ("103", "C"), ("104", "D")]));
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.new, 1);
    assert_eq!(sink.notified_ids(), vec!["101", "102", "103", "104"]);
    assert_eq!(store.snapshot().await.seen.len(), 4);
}

#[tokio::test]
async fn unchanged_page_produces_no_notifications() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "one"), ("2", "two")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let (engine, _events) = engine_with(&source, &sink, &store, test_config());

    let mut session = engine.start_session().await;
    engine.run_once(&mut session).await.unwrap();
    let sent_after_first = sink.attempts().len();
    let saves_after_first = store.save_count();

    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.new, 0);
    assert_eq!(sink.attempts().len(), sent_after_first);
    // Nothing changed, nothing written
    assert!(!report.persisted);
    assert_eq!(store.save_count(), saves_after_first);
}

#[tokio::test]
async fn empty_page_is_not_mass_deletion() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "one"), ("2", "two")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let (engine, _events) = engine_with(&source, &sink, &store, test_config());

    let mut session = engine.start_session().await;
    engine.run_once(&mut session).await.unwrap();
    let before = store.snapshot().await.seen;

    // Page temporarily renders nothing
    source.set_page("<html><body><p>Please wait...</p></body></html>");
    let report = engine.run_once(&mut session).await.unwrap();
    assert_eq!(report.parsed, 0);
    assert_eq!(report.new, 0);

    // Comments come back: nothing is re-notified
    source.set_page(thread_page(&[("1", "one"), ("2", "two")]));
    let report = engine.run_once(&mut session).await.unwrap();
    assert_eq!(report.new, 0);

    assert_eq!(store.snapshot().await.seen, before);
    assert_eq!(sink.notified_ids(), vec!["1", "2"]);
}

#[tokio::test]
async fn mark_seen_mode_skips_the_initial_backlog() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "old"), ("2", "older")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let mut config = test_config();
    config.engine.initial_mode = InitialMode::MarkSeen;
    let (engine, mut events) = engine_with(&source, &sink, &store, config);

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.marked_seen, 2);
    assert_eq!(report.new, 0);
    assert!(sink.attempts().is_empty());
    assert_eq!(store.snapshot().await.seen.len(), 2);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::InitialSnapshot { marked: 2 });

    // Later comments are notified normally
    source.set_page(thread_page(&[("1", "old"), ("2", "older"), ("3", "fresh")]));
    engine.run_once(&mut session).await.unwrap();
    assert_eq!(sink.notified_ids(), vec!["3"]);
}

#[tokio::test]
async fn mark_seen_mode_waits_for_a_non_empty_page() {
    let source = ScriptedPageSource::new("<html></html>");
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let mut config = test_config();
    config.engine.initial_mode = InitialMode::MarkSeen;
    let (engine, _events) = engine_with(&source, &sink, &store, config);

    let mut session = engine.start_session().await;
    engine.run_once(&mut session).await.unwrap();
    assert!(session.state().seen.is_empty());

    source.set_page(thread_page(&[("9", "first")]));
    let report = engine.run_once(&mut session).await.unwrap();
    assert_eq!(report.marked_seen, 1);
    assert!(sink.attempts().is_empty());
}

#[tokio::test]
async fn startup_snapshot_is_not_notified_twice() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "first"), ("2", "latest")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let mut config = test_config();
    config.engine.startup.enabled = true;
    config.engine.startup.image_url = Some("https://cdn.example.com/hello.png".to_string());
    let (engine, _events) = engine_with(&source, &sink, &store, config);

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();
    assert!(report.startup_sent);

    let texts = sink.delivered_texts();
    assert_eq!(texts[0], format!("Monitoring started: {}", PAGE_URL));
    assert!(texts[1].starts_with("<b>Latest comment at startup</b>"));
    assert!(texts[1].contains("#comment-2\""));
    let greeting = "https://cdn.example.com/hello.png";
    assert!(
        sink.delivered()
            .iter()
            .any(|s| matches!(s, Sent::Image { url, .. } if url == greeting))
    );

    // Both comments were new, but the latest already went out as the snapshot
    assert_eq!(report.new, 2);
    assert_eq!(sink.notified_ids(), vec!["1"]);
    assert_eq!(sink.notifications_for("2"), 0);
    assert!(session.state().seen.contains("1"));
    assert!(session.state().seen.contains("2"));

    // Startup happens once per process
    let before = sink.attempts().len();
    engine.run_once(&mut session).await.unwrap();
    assert_eq!(sink.attempts().len(), before);
}

#[tokio::test]
async fn previously_seen_state_is_honoured() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "a"), ("2", "b"), ("3", "c")]));
    let sink = RecordingSink::new();
    let mut state = threadwatch_core::State::new();
    state.seen.insert("1");
    state.seen.insert("3");
    let store = MemoryStateStore::with_state(state);
    let (engine, _events) = engine_with(&source, &sink, &store, test_config());

    let mut session = engine.start_session().await;
    engine.run_once(&mut session).await.unwrap();

    assert_eq!(sink.notified_ids(), vec!["2"]);
}

#[tokio::test]
async fn startup_snapshot_is_sent_for_already_seen_comment() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "a"), ("2", "b")]));
    let sink = RecordingSink::new();
    let mut state = threadwatch_core::State::new();
    state.seen.insert("1");
    state.seen.insert("2");
    let store = MemoryStateStore::with_state(state);
    let mut config = test_config();
    config.engine.startup.enabled = true;
    let (engine, _events) = engine_with(&source, &sink, &store, config);

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();

    assert!(report.startup_sent);
    assert_eq!(report.new, 0);
    assert!(sink.notified_ids().is_empty());
    assert!(
        sink.delivered_texts()
            .iter()
            .any(|t| t.starts_with("<b>Latest comment at startup</b>")
                && t.contains("#comment-2\""))
    );
}
