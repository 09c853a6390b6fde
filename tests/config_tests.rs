//! Configuration tests
//!
//! YAML files drive limits, timeouts and the service directory of an
//! engine built from them.

mod common;

use common::*;
use std::io::Write;
use tempfile::NamedTempFile;
use this_graphql::prelude::*;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_yaml_file() {
    let file = write_config(
        r#"
timeout_ms: 1500
plan_cache_capacity: 64
max_depth: 4
max_complexity: 100
max_batch_size: 25
services:
  - name: reviews
    endpoint: http://reviews.internal/graphql
"#,
    );

    let config = EngineConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.timeout(), Some(std::time::Duration::from_millis(1500)));
    assert_eq!(config.plan_cache_capacity, 64);
    assert_eq!(config.max_depth, Some(4));
    assert_eq!(config.max_complexity, Some(100));
    assert_eq!(config.max_batch_size, Some(25));
    assert_eq!(
        config.services,
        vec![ServiceConfig {
            name: "reviews".into(),
            endpoint: Some("http://reviews.internal/graphql".into()),
        }]
    );
}

#[test]
fn test_missing_file_is_an_error() {
    let result = EngineConfig::from_yaml_file("/nonexistent/engine.yaml");
    assert!(result.is_err());
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let file = write_config("max_depth: [not, a, number]\n");
    assert!(EngineConfig::from_yaml_file(file.path().to_str().unwrap()).is_err());
}

#[tokio::test]
async fn test_depth_limit_from_file_rejects_deep_queries() {
    let file = write_config("max_depth: 2\n");
    let config = EngineConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();
    let store = bookstore_with(config, book_fetcher(), author_fetcher());

    let shallow = store
        .engine
        .execute(Request::new(r#"{ book(id: "1") { title } }"#))
        .await;
    let deep = store
        .engine
        .execute(Request::new("{ books { author { name } } }"))
        .await;

    assert!(shallow.is_ok());
    assert_eq!(deep.data, Value::Null);
    assert_eq!(error_codes(&deep), vec!["DEPTH_LIMIT_EXCEEDED"]);
    assert_eq!(store.books.call_count(), 1);
}

#[tokio::test]
async fn test_complexity_limit_rejects_wide_queries() {
    let config = EngineConfig::from_yaml_str("max_complexity: 2\n").unwrap();
    let store = bookstore_with(config, book_fetcher(), author_fetcher());

    let response = store
        .engine
        .execute(Request::new("{ hello greeting viewer }"))
        .await;

    assert_eq!(response.data, Value::Null);
    assert_eq!(error_codes(&response), vec!["COMPLEXITY_LIMIT_EXCEEDED"]);
}

#[tokio::test]
async fn test_disabled_plan_cache_still_executes() {
    let config = EngineConfig::from_yaml_str("plan_cache_capacity: 0\n").unwrap();
    let store = bookstore_with(config, book_fetcher(), author_fetcher());

    let response = store.engine.execute(Request::new("{ hello }")).await;

    assert!(response.is_ok());
    assert!(store.engine.plan_cache().is_empty());
}
