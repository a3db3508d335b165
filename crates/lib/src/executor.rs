//! # Query Execution
//!
//! Runs generated queries against the storage backend with bounded retries.
//! Failures are classified by sniffing the driver message: transient classes
//! (connectivity, deadlock, lock contention, missing table after a schema
//! change) are retried with exponential backoff, everything else fails fast
//! so the caller can regenerate the query instead of hammering the database.

use crate::config::RetryPolicy;
use crate::providers::db::storage::Storage;
use crate::types::{GeneratedQuery, Row};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Whether a database failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Lowercased substrings that mark a transient failure. SQLSTATE codes cover
/// ODBC-style drivers (connectivity 08xxx, serialization 40001, missing base
/// table 42S02); the prose markers cover drivers that only surface text.
const RETRYABLE_MARKERS: &[&str] = &[
    "08001",
    "08s01",
    "40001",
    "42s02",
    "deadlock",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "database is locked",
    "no such table",
];

/// Classifies a driver error message.
pub fn classify_db_error(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if RETRYABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Fatal
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Query failed after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },
    #[error("Query failed: {message}")]
    Fatal { message: String },
}

impl ExecutionError {
    /// The underlying driver message, for repair prompts and trace events.
    pub fn message(&self) -> &str {
        match self {
            ExecutionError::RetriesExhausted { message, .. }
            | ExecutionError::Fatal { message } => message,
        }
    }
}

/// Executes queries with the configured retry policy.
#[derive(Debug)]
pub struct QueryExecutor {
    storage: Arc<dyn Storage>,
    policy: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(storage: Arc<dyn Storage>, policy: RetryPolicy) -> Self {
        Self { storage, policy }
    }

    /// Runs `query`, retrying transient failures until the attempt budget is
    /// spent. Non-retryable failures return immediately.
    pub async fn execute(&self, query: &GeneratedQuery) -> Result<Vec<Row>, ExecutionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay_ms = self.policy.initial_delay_ms;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.storage.execute_query(&query.sql, &query.params).await {
                Ok(rows) => {
                    debug!(
                        "Query succeeded on attempt {attempt} with {} row(s).",
                        rows.len()
                    );
                    return Ok(rows);
                }
                Err(e) => {
                    let message = e.to_string();
                    if classify_db_error(&message) == ErrorClass::Fatal {
                        warn!("Query failed with a non-retryable error: {message}");
                        return Err(ExecutionError::Fatal { message });
                    }
                    warn!("Attempt {attempt}/{max_attempts} failed with a retryable error: {message}");
                    last_error = message;
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = delay_ms.saturating_mul(u64::from(self.policy.backoff_factor));
                    }
                }
            }
        }

        Err(ExecutionError::RetriesExhausted {
            attempts: max_attempts,
            message: last_error,
        })
    }
}
