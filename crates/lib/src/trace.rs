//! # Reasoning Trace
//!
//! An append-only, timestamped narrative of one request's processing: which
//! intent was detected, which tables were retrieved, what SQL was generated,
//! how execution went. The chat layer renders it for transparency; a live
//! subscriber can receive each step as it is appended through a [`TraceSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// The pipeline stage a reasoning step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Intent,
    Extraction,
    Schema,
    Query,
    Execution,
    Error,
    Completion,
}

impl fmt::Display for StepCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepCategory::Intent => "INTENT",
            StepCategory::Extraction => "EXTRACTION",
            StepCategory::Schema => "SCHEMA",
            StepCategory::Query => "QUERY",
            StepCategory::Execution => "EXECUTION",
            StepCategory::Error => "ERROR",
            StepCategory::Completion => "COMPLETION",
        };
        f.write_str(name)
    }
}

/// One timestamped decision in the pipeline's narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub timestamp: DateTime<Utc>,
    pub category: StepCategory,
    pub message: String,
}

impl fmt::Display for ReasoningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.category,
            self.message
        )
    }
}

/// The ordered log of [`ReasoningStep`]s for one user turn.
///
/// Steps are only ever appended; the trace is never reordered or rewritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningTrace {
    steps: Vec<ReasoningStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a timestamped step and returns a copy of it, so callers can
    /// forward the exact step to a live subscriber.
    pub fn append(&mut self, category: StepCategory, message: impl Into<String>) -> ReasoningStep {
        let step = ReasoningStep {
            timestamp: Utc::now(),
            category,
            message: message.into(),
        };
        self.steps.push(step.clone());
        step
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Renders the whole trace as one line per step, for logs or a debug view.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A live subscriber for reasoning steps.
///
/// Implementations are called synchronously while a turn is being processed
/// and must return quickly; buffer or drop instead of blocking. Emission is
/// fire-and-forget: the pipeline ignores anything a sink does wrong.
pub trait TraceSink: Send + Sync + fmt::Debug {
    fn notify(&self, session_id: &str, step: &ReasoningStep);
}

/// The default sink: discards every step.
#[derive(Debug, Clone, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn notify(&self, _session_id: &str, _step: &ReasoningStep) {}
}

/// A sink that buffers every emitted step, keyed by session, for tests and
/// UI replay.
#[derive(Debug, Clone, Default)]
pub struct BufferTraceSink {
    steps: Arc<Mutex<Vec<(String, ReasoningStep)>>>,
}

impl BufferTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub fn emitted(&self) -> Vec<(String, ReasoningStep)> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl TraceSink for BufferTraceSink {
    fn notify(&self, session_id: &str, step: &ReasoningStep) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push((session_id.to_string(), step.clone()));
        }
    }
}
