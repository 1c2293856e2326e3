//! Architectural Contract Test: Retry Architecture
//!
//! This test verifies that retries are owned by the core and bounded.
//!
//! Constraints verified:
//! - Transient send failures are retried with backoff, up to the bound
//! - A comment delivered after retries is sent exactly once afterwards
//! - Terminal failures are not retried, and the comment still counts as processed
//! - One comment's failure does not block the next one
//! - Fetch failures (transport, timeout, non-2xx) abort the tick without side effects
//!
//! If this test fails, someone has:
//! - Moved retry logic into a sink or source
//! - Made delivery failures re-notify forever
//! - Let a fetch failure touch the seen set

mod common;

use common::*;
use std::time::Duration;
use threadwatch_core::error::Error;
use threadwatch_core::state::MemoryStateStore;
use threadwatch_core::traits::FetchedPage;
use threadwatch_core::{EngineEvent, PollEngine};

fn build(
    source: &ScriptedPageSource,
    sink: &RecordingSink,
    store: &MemoryStateStore,
) -> (PollEngine, tokio::sync::mpsc::Receiver<EngineEvent>) {
    PollEngine::new(
        Box::new(source.clone()),
        Box::new(sink.clone()),
        Box::new(store.clone()),
        test_config(),
    )
    .expect("engine construction succeeds")
}

#[tokio::test]
async fn transient_failures_then_success_is_delivered_once() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "A"), ("2", "B"), ("3", "C")]));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let (engine, _events) = build(&source, &sink, &store);

    let mut session = engine.start_session().await;
    engine.run_once(&mut session).await.unwrap();

    // D fails twice with retriable errors, then succeeds
    sink.push_results([
        Err(Error::http("502 Bad Gateway")),
        Err(Error::rate_limited("Too Many Requests", Some(Duration::from_millis(5)))),
        Ok(()),
    ]);
    source.set_page(thread_page(&[("1", "A"), ("2", "B"), ("3", "C"), ("4", "D")]));
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.new, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert!(store.snapshot().await.seen.contains("4"));

    // Three attempts for D's text, one delivery
    let d_attempts = sink
        .attempts()
        .iter()
        .filter(|s| s.text().is_some_and(|t| t.contains("#comment-4\"")))
        .count();
    assert_eq!(d_attempts, 3);
    assert_eq!(sink.notifications_for("4"), 1);

    // No duplicate on later ticks
    engine.run_once(&mut session).await.unwrap();
    assert_eq!(sink.notifications_for("4"), 1);
}

#[tokio::test]
async fn retries_are_bounded_and_comment_still_processed() {
    let source = ScriptedPageSource::new(thread_page(&[("7", "x")]));
    let sink = RecordingSink::new();
    // max_retries = 3 → 4 attempts
    sink.push_results((0..4).map(|_| Err(Error::http("503 Service Unavailable"))));
    let store = MemoryStateStore::new();
    let (engine, mut events) = build(&source, &sink, &store);

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(sink.attempts().len(), 4);
    assert!(sink.delivered().is_empty());
    assert!(store.snapshot().await.seen.contains("7"));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::DeliveryFailed { comment_id, .. } = event {
            assert_eq!(comment_id, "7");
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // Not retried on the next tick
    engine.run_once(&mut session).await.unwrap();
    assert_eq!(sink.attempts().len(), 4);
}

#[tokio::test]
async fn rejected_image_is_terminal_and_isolated() {
    let source = ScriptedPageSource::new(thread_page_with_images(&[
        ("10", vec!["/img/broken.png", "/img/fine.png"]),
        ("11", vec![]),
    ]));
    let sink = RecordingSink::new();
    // text of 10 ok, first image rejected, rest ok
    sink.push_results([Ok(()), Err(Error::rejected("Bad Request: wrong file identifier"))]);
    let store = MemoryStateStore::new();
    let (engine, _events) = build(&source, &sink, &store);

    let mut session = engine.start_session().await;
    let report = engine.run_once(&mut session).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);

    let attempts = sink.attempts();
    let broken = attempts
        .iter()
        .filter(|s| matches!(s, Sent::Image { url, .. } if url.ends_with("broken.png")))
        .count();
    assert_eq!(broken, 1, "terminal failures must not be retried");
    let fine = "https://www.example.com/img/fine.png";
    assert!(
        attempts
            .iter()
            .any(|s| matches!(s, Sent::Image { url, .. } if url == fine))
    );

    assert_eq!(sink.notified_ids(), vec!["10", "11"]);
    let seen = store.snapshot().await.seen;
    assert!(seen.contains("10") && seen.contains("11"));
}

#[tokio::test]
async fn fetch_failures_abort_the_tick() {
    let source = ScriptedPageSource::new(thread_page(&[("1", "A")]));
    source.push_response(Err(Error::fetch("connection reset")));
    source.push_response(Ok(FetchedPage::new("<html>maintenance</html>", 503, PAGE_URL)));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let (engine, _events) = build(&source, &sink, &store);

    let mut session = engine.start_session().await;

    let err = engine.run_once(&mut session).await.unwrap_err();
    assert!(err.is_retriable());

    let err = engine.run_once(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)), "non-2xx is a fetch failure: {:?}", err);

    assert!(sink.attempts().is_empty());
    assert!(session.state().seen.is_empty());
    assert!(session.state().last_successful_poll.is_none());
    assert_eq!(store.save_count(), 0);

    // Next tick recovers
    let report = engine.run_once(&mut session).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(source.fetch_count(), 3);
}

#[tokio::test]
async fn hung_fetch_times_out() {
    let source =
        ScriptedPageSource::new(thread_page(&[("1", "A")])).with_delay(Duration::from_secs(30));
    let sink = RecordingSink::new();
    let store = MemoryStateStore::new();
    let mut config = test_config();
    config.engine.fetch_timeout_secs = 1;
    let (engine, _events) = PollEngine::new(
        Box::new(source.clone()),
        Box::new(sink.clone()),
        Box::new(store.clone()),
        config,
    )
    .unwrap();

    let mut session = engine.start_session().await;
    let result = tokio::time::timeout(Duration::from_secs(5), engine.run_once(&mut session))
        .await
        .expect("fetch timeout bounds the tick");

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert!(sink.attempts().is_empty());
}
