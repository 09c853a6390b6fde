//! Cancellation and deadline tests
//!
//! Interrupted requests return promptly with the data resolved so far,
//! pending fields nulled, and one terminal error.

mod common;

use common::*;
use std::time::{Duration, Instant};
use this_graphql::prelude::*;

/// Upper bound for "returns promptly"; the blocked resolvers sleep an hour
const PROMPT: Duration = Duration::from_secs(5);

async fn execute_promptly(engine: &GraphQLEngine, request: Request) -> Response {
    let started = Instant::now();
    let response = tokio::time::timeout(PROMPT, engine.execute(request))
        .await
        .expect("request did not return after interruption");
    assert!(started.elapsed() < PROMPT);
    response
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test]
async fn test_request_timeout_returns_partial_data() {
    let store = bookstore();
    let response = execute_promptly(
        &store.engine,
        Request::new("{ hello slow }").timeout(Duration::from_millis(50)),
    )
    .await;

    assert_eq!(response.data, json!({"hello": "world", "slow": null}));
    assert_eq!(error_codes(&response), vec!["DEADLINE_EXCEEDED"]);
    assert!(response.errors[0].path.is_none());
}

#[tokio::test]
async fn test_configured_timeout_applies_by_default() {
    let config = EngineConfig {
        timeout_ms: Some(50),
        ..EngineConfig::default()
    };
    let store = bookstore_with(config, book_fetcher(), author_fetcher());
    let response = execute_promptly(&store.engine, Request::new("{ slow }")).await;

    assert_eq!(response.data, json!({"slow": null}));
    assert_eq!(error_codes(&response), vec!["DEADLINE_EXCEEDED"]);
}

#[tokio::test]
async fn test_pending_non_null_field_nulls_its_parent() {
    let store = bookstore();
    let response = execute_promptly(
        &store.engine,
        Request::new("{ hello slowStrict }").timeout(Duration::from_millis(50)),
    )
    .await;

    assert_eq!(response.data, Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(error_codes(&response), vec!["DEADLINE_EXCEEDED"]);
}

#[tokio::test]
async fn test_timeout_while_waiting_on_batch_fetch() {
    let slow_authors = author_fetcher().with_latency(FAR_FUTURE);
    let store = bookstore_with(EngineConfig::default(), book_fetcher(), slow_authors);

    let response = execute_promptly(
        &store.engine,
        Request::new(r#"{ book(id: "1") { title author { name } } }"#).timeout(Duration::from_millis(50)),
    )
    .await;

    assert_eq!(response.data, json!({"book": {"title": "Dune", "author": null}}));
    assert_eq!(error_codes(&response), vec!["DEADLINE_EXCEEDED"]);
    assert_eq!(store.authors.call_count(), 1);
}

#[tokio::test]
async fn test_fast_request_is_not_interrupted() {
    let store = bookstore();
    let response = store
        .engine
        .execute(Request::new(r#"{ book(id: "2") { title } }"#).timeout(Duration::from_secs(30)))
        .await;

    assert!(response.is_ok());
    assert_eq!(response.data, json!({"book": {"title": "The Left Hand of Darkness"}}));
}

// ============================================================================
// Caller Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancellation_token_interrupts_request() {
    let store = bookstore();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let response = execute_promptly(&store.engine, Request::new("{ hello slow }").cancellation(token)).await;

    assert_eq!(response.data, json!({"hello": "world", "slow": null}));
    assert_eq!(error_codes(&response), vec!["CANCELLED"]);
}

#[tokio::test]
async fn test_already_cancelled_request_runs_no_resolvers() {
    let store = bookstore();
    let token = CancellationToken::new();
    token.cancel();

    let response = execute_promptly(
        &store.engine,
        Request::new(r#"{ hello book(id: "1") { title } }"#).cancellation(token),
    )
    .await;

    assert_eq!(response.data, json!({"hello": null, "book": null}));
    assert_eq!(error_codes(&response), vec!["CANCELLED"]);
    assert_eq!(store.books.call_count(), 0);
}
