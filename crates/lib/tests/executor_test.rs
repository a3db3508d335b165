//! Tests for query execution: retry classification, backoff and exhaustion.

mod common;

use carerag::config::RetryPolicy;
use carerag::executor::{classify_db_error, ErrorClass, ExecutionError, QueryExecutor};
use common::{availability_row, setup_tracing, simple_query, ScriptStep, ScriptedStorage};
use std::sync::Arc;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        backoff_factor: 2,
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    setup_tracing();

    // 1. Two deadlocks, then rows.
    let storage = ScriptedStorage::new(vec![
        ScriptStep::Fail("deadlock detected".to_string()),
        ScriptStep::Fail("deadlock detected".to_string()),
        ScriptStep::Rows(vec![availability_row("Jon", "Snow", 3, "09:00:00", "17:00:00", 0)]),
    ]);
    let executor = QueryExecutor::new(Arc::new(storage.clone()), fast_policy());

    // 2. The third attempt succeeds.
    let rows = executor
        .execute(&simple_query("SELECT 1"))
        .await
        .expect("retries should recover");
    assert_eq!(rows.len(), 1);
    assert_eq!(storage.call_count(), 3);
}

#[tokio::test]
async fn test_fatal_errors_are_not_retried() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![ScriptStep::Fail(
        "no such column: Oops".to_string(),
    )]);
    let executor = QueryExecutor::new(Arc::new(storage.clone()), fast_policy());

    let err = executor
        .execute(&simple_query("SELECT Oops FROM Employee"))
        .await
        .unwrap_err();

    // A schema mistake will not fix itself; it fails fast so the repair
    // loop can rewrite the query instead.
    assert!(matches!(err, ExecutionError::Fatal { .. }));
    assert!(err.message().contains("no such column"));
    assert_eq!(storage.call_count(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_report_the_attempt_count() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![
        ScriptStep::Fail("database is locked".to_string()),
        ScriptStep::Fail("database is locked".to_string()),
        ScriptStep::Fail("database is locked".to_string()),
    ]);
    let executor = QueryExecutor::new(Arc::new(storage.clone()), fast_policy());

    let err = executor.execute(&simple_query("SELECT 1")).await.unwrap_err();

    match err {
        ExecutionError::RetriesExhausted { attempts, message } => {
            assert_eq!(attempts, 3);
            assert!(message.contains("database is locked"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(storage.call_count(), 3);
}

#[tokio::test]
async fn test_parameters_reach_the_storage_layer() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![ScriptStep::Rows(vec![])]);
    let executor = QueryExecutor::new(Arc::new(storage.clone()), fast_policy());

    let mut query = simple_query("SELECT * FROM Employee WHERE LOWER(FirstName) LIKE ?");
    query
        .params
        .push(carerag::types::SqlParam::Text("%jon%".to_string()));
    executor.execute(&query).await.expect("query should run");

    let calls = storage.calls.read().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1,
        vec![carerag::types::SqlParam::Text("%jon%".to_string())]
    );
}

#[test]
fn test_error_classification() {
    // Messages are matched case-insensitively.
    assert_eq!(classify_db_error("Deadlock found"), ErrorClass::Retryable);
    assert_eq!(classify_db_error("connection reset by peer"), ErrorClass::Retryable);
    assert_eq!(classify_db_error("SQLSTATE 42S02: base table not found"), ErrorClass::Retryable);
    assert_eq!(classify_db_error("operation timed out"), ErrorClass::Retryable);
    assert_eq!(classify_db_error("database is locked"), ErrorClass::Retryable);

    assert_eq!(classify_db_error("no such column: Oops"), ErrorClass::Fatal);
    assert_eq!(classify_db_error("syntax error near SELECT"), ErrorClass::Fatal);
}
