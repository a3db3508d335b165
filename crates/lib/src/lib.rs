//! # Natural Language to Clinical SQL
//!
//! This crate turns chat messages about a clinical booking database into
//! readonly SQL, executes it, and renders the rows back into conversational
//! answers. The schema is never hardcoded: a catalog introspects (or parses)
//! it at runtime, an index retrieves the relevant tables per question, and
//! the generator grounds every query in that retrieved subset. Each turn
//! produces a [`ChatResponse`] carrying the answer together with a
//! step-by-step [`ReasoningTrace`].

pub mod availability;
pub mod config;
pub mod errors;
pub mod executor;
pub mod formatter;
pub mod intent;
pub mod prompts;
pub mod providers;
pub mod schema;
pub mod sqlgen;
pub mod tools;
pub mod trace;
pub mod types;

pub use config::{
    EmbeddingConfig, FormatterConfig, GeneratorConfig, PipelineConfig, ProviderConfig,
    RetrievalConfig, RetryPolicy,
};
pub use errors::PipelineError;
pub use intent::{Classification, ExtractedEntities, Intent, IntentClassifier};
pub use schema::{
    parse_ddl, CatalogStatus, IndexStatus, RetrievalMethod, RetrievalResult, SchemaCatalog,
    SchemaIndex,
};
pub use tools::ToolKind;
pub use trace::{
    BufferTraceSink, NullTraceSink, ReasoningStep, ReasoningTrace, StepCategory, TraceSink,
};
pub use types::{
    ChatPipelineBuilder, ChatResponse, GeneratedQuery, GenerationMethod, ResponseStatus, Row,
    SqlParam,
};

use crate::availability::build_availability_query;
use crate::executor::QueryExecutor;
use crate::formatter::ResultFormatter;
use crate::schema::SchemaChangeSet;
use crate::sqlgen::SqlGenerator;
use chrono::Utc;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A point-in-time view of the schema catalog and the retrieval index.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub catalog: CatalogStatus,
    pub index: IndexStatus,
}

/// The chat pipeline: classify, retrieve, generate, execute, format.
///
/// Built with [`ChatPipelineBuilder`]; every dependency is injected there, so
/// tests can swap any provider for a scripted double.
#[derive(Debug)]
pub struct ChatPipeline {
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) index: Arc<SchemaIndex>,
    pub(crate) generator: SqlGenerator,
    pub(crate) executor: QueryExecutor,
    pub(crate) formatter: ResultFormatter,
    pub(crate) classifier: IntentClassifier,
    pub(crate) trace_sink: Arc<dyn TraceSink>,
    pub(crate) config: PipelineConfig,
}

impl ChatPipeline {
    pub fn builder() -> ChatPipelineBuilder {
        ChatPipelineBuilder::new()
    }

    /// Loads the schema and builds the retrieval index.
    ///
    /// Call once before the first [`respond`](Self::respond); this is the one
    /// place a schema failure is fatal, because there is no previous snapshot
    /// to keep serving.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        self.catalog.force_refresh().await?;
        self.index.index(self.catalog.current().await).await;
        let status = self.schema_status().await;
        info!(
            "Pipeline initialized with {} table(s) ({} embedded).",
            status.catalog.table_count, status.index.embedded_tables
        );
        Ok(())
    }

    /// Re-introspects the schema and rebuilds the index when it changed.
    pub async fn refresh_schema(&self) -> Result<SchemaChangeSet, PipelineError> {
        let changes = self.catalog.force_refresh().await?;
        if !changes.is_empty() {
            info!("Schema changed: {}", changes.summary());
        }
        self.index.index(self.catalog.current().await).await;
        Ok(changes)
    }

    pub async fn schema_status(&self) -> SchemaStatus {
        SchemaStatus {
            catalog: self.catalog.status().await,
            index: self.index.status().await,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answers one user message.
    ///
    /// Never fails: every error path degrades to a [`ChatResponse`] with
    /// `status = error` and a support code, and the reasoning trace records
    /// how far the turn got. Raw driver messages stay in the trace and the
    /// logs, never in the user-facing message.
    pub async fn respond(&self, session_id: &str, user_message: &str) -> ChatResponse {
        let started = Instant::now();
        let mut trace = ReasoningTrace::new();
        let today = Utc::now().date_naive();

        let message = user_message.trim();
        if message.is_empty() {
            self.note(
                session_id,
                &mut trace,
                StepCategory::Intent,
                format!("Empty message; routed to the {} tool.", ToolKind::Validation),
            );
            return ChatResponse {
                message: "I did not catch that. What would you like to know?".to_string(),
                status: ResponseStatus::NeedClarification,
                suggestions: vec![
                    "Check a provider's availability".to_string(),
                    "Book an appointment".to_string(),
                    "Show my upcoming appointments".to_string(),
                ],
                trace,
                intent: Intent::General,
                confidence: 0.0,
                sql: None,
                row_count: None,
                processing_time_ms: elapsed_ms(started),
            };
        }

        // Pick up schema changes before answering. Errors here degrade the
        // catalog, which keeps serving the previous snapshot.
        let changes = self.catalog.check_for_changes().await;
        if !changes.is_empty() {
            self.note(
                session_id,
                &mut trace,
                StepCategory::Schema,
                format!("Schema changed since the last turn: {}.", changes.summary()),
            );
        }
        self.index.index(self.catalog.current().await).await;

        let classification = self.classifier.classify(message).await;
        let tool = ToolKind::from(classification.intent);
        self.note(
            session_id,
            &mut trace,
            StepCategory::Intent,
            format!(
                "Detected intent `{}` (confidence {:.2}); routing to the {} tool.",
                classification.intent, classification.confidence, tool
            ),
        );

        let entities = self.classifier.extract_entities(message, today);
        self.note(
            session_id,
            &mut trace,
            StepCategory::Extraction,
            format!("Extracted entities: {}.", entities.summary()),
        );

        if tool == ToolKind::Booking {
            return self.booking_response(session_id, trace, classification, started);
        }

        let retrieved = self.index.retrieve(message).await;
        self.note(
            session_id,
            &mut trace,
            StepCategory::Schema,
            format!(
                "Retrieved {} table(s) via {} (confidence {:.2}): {}.",
                retrieved.tables.len(),
                retrieved.method,
                retrieved.confidence,
                retrieved.table_names().join(", ")
            ),
        );

        let mut tables = retrieved.tables;
        if tool == ToolKind::Availability && !tables.iter().any(|t| t.name == "Appointment") {
            // Conflict analysis needs the appointment table even when
            // retrieval did not rank it.
            let snapshot = self.catalog.current().await;
            if let Some(appointments) = snapshot.table("Appointment") {
                tables.push(appointments.clone());
                self.note(
                    session_id,
                    &mut trace,
                    StepCategory::Schema,
                    "Added the Appointment table for conflict analysis.",
                );
            }
        }

        if tables.is_empty() {
            self.note(
                session_id,
                &mut trace,
                StepCategory::Error,
                "No schema is available; cannot build a query.",
            );
            return self.error_response(trace, classification, "SCHEMA-EMPTY", started);
        }

        let generated = if tool == ToolKind::Availability {
            match build_availability_query(&tables, &entities, today) {
                Ok(query) => Ok(query),
                Err(e) => {
                    self.note(
                        session_id,
                        &mut trace,
                        StepCategory::Query,
                        format!("Availability template not applicable ({e}); using the general generator."),
                    );
                    self.generator.generate(message, &tables, &entities, today).await
                }
            }
        } else {
            self.generator.generate(message, &tables, &entities, today).await
        };
        let mut query = match generated {
            Ok(query) => query,
            Err(e) => {
                warn!("Query generation failed: {e}");
                self.note(
                    session_id,
                    &mut trace,
                    StepCategory::Error,
                    format!("Could not generate a query: {e}."),
                );
                return self.error_response(trace, classification, "GEN-FAIL", started);
            }
        };
        self.note(
            session_id,
            &mut trace,
            StepCategory::Query,
            format!("Generated SQL ({}): {}", query.method, query.preview()),
        );

        // Execute, repairing the query on failure until the generation
        // budget is spent, then fall back to the rule-based builder exactly
        // once. Repairs only ever apply to AI-generated SQL.
        let max_attempts = self.generator.max_attempts();
        let mut generation_attempts: u32 = 1;
        let mut rule_based_tried = query.method == GenerationMethod::RuleBased;
        let rows = loop {
            match self.executor.execute(&query).await {
                Ok(rows) => {
                    self.note(
                        session_id,
                        &mut trace,
                        StepCategory::Execution,
                        format!("Query returned {} row(s).", rows.len()),
                    );
                    break rows;
                }
                Err(e) => {
                    self.note(
                        session_id,
                        &mut trace,
                        StepCategory::Error,
                        format!("Execution failed: {}.", e.message()),
                    );
                    let can_repair = query.method == GenerationMethod::Llm
                        && self.generator.llm_available()
                        && generation_attempts < max_attempts;
                    if can_repair {
                        // The failure may be schema drift; refresh before
                        // asking for a repair so the prompt sees the current
                        // tables.
                        let drift = self.catalog.check_for_changes().await;
                        if !drift.is_empty() {
                            self.index.index(self.catalog.current().await).await;
                            let fresh = self.index.retrieve(message).await;
                            if !fresh.tables.is_empty() {
                                tables = fresh.tables;
                            }
                            self.note(
                                session_id,
                                &mut trace,
                                StepCategory::Schema,
                                format!("Schema refreshed after the failure: {}.", drift.summary()),
                            );
                        }
                        generation_attempts += 1;
                        match self
                            .generator
                            .regenerate(message, &tables, &query.sql, e.message())
                            .await
                        {
                            Ok(repaired) => {
                                self.note(
                                    session_id,
                                    &mut trace,
                                    StepCategory::Query,
                                    format!(
                                        "Regenerated SQL (attempt {generation_attempts}): {}",
                                        repaired.preview()
                                    ),
                                );
                                query = repaired;
                                continue;
                            }
                            Err(repair_err) => {
                                warn!("Query repair failed: {repair_err}");
                                self.note(
                                    session_id,
                                    &mut trace,
                                    StepCategory::Error,
                                    format!("Query repair failed: {repair_err}."),
                                );
                            }
                        }
                    }
                    if !rule_based_tried {
                        rule_based_tried = true;
                        if let Ok(fallback) = self.generator.rule_based(&tables, &entities) {
                            self.note(
                                session_id,
                                &mut trace,
                                StepCategory::Query,
                                format!("Falling back to a rule-based query: {}", fallback.preview()),
                            );
                            query = fallback;
                            continue;
                        }
                    }
                    return self.error_response(trace, classification, "EXEC-FAIL", started);
                }
            }
        };

        let reply = self.formatter.format(message, &rows);
        let elapsed = elapsed_ms(started);
        self.note(
            session_id,
            &mut trace,
            StepCategory::Completion,
            format!("Turn completed in {elapsed} ms."),
        );

        ChatResponse {
            message: reply.message,
            status: reply.status,
            suggestions: reply.suggestions,
            trace,
            intent: classification.intent,
            confidence: classification.confidence,
            sql: Some(query.sql),
            row_count: Some(rows.len()),
            processing_time_ms: elapsed,
        }
    }

    /// Appends a trace step and forwards it to the sink. A panicking sink is
    /// contained here so it can never take a turn down with it.
    fn note(
        &self,
        session_id: &str,
        trace: &mut ReasoningTrace,
        category: StepCategory,
        message: impl Into<String>,
    ) {
        let step = trace.append(category, message);
        let sink = Arc::clone(&self.trace_sink);
        if catch_unwind(AssertUnwindSafe(|| sink.notify(session_id, &step))).is_err() {
            warn!("A trace sink panicked while handling a step; continuing without it.");
        }
    }

    fn booking_response(
        &self,
        session_id: &str,
        mut trace: ReasoningTrace,
        classification: Classification,
        started: Instant,
    ) -> ChatResponse {
        let ask = if classification.intent == Intent::CancelAppointment {
            "I can help with that. Which appointment would you like to cancel? Please share the provider's name and the appointment date."
        } else {
            "I can help with that. Who would you like to see, and on what day and time?"
        };
        self.note(
            session_id,
            &mut trace,
            StepCategory::Completion,
            "Booking flow needs details from the user; asking for clarification.",
        );
        ChatResponse {
            message: ask.to_string(),
            status: ResponseStatus::NeedClarification,
            suggestions: vec![
                "Check a provider's availability first".to_string(),
                "Find a provider".to_string(),
                "Show my upcoming appointments".to_string(),
            ],
            trace,
            intent: classification.intent,
            confidence: classification.confidence,
            sql: None,
            row_count: None,
            processing_time_ms: elapsed_ms(started),
        }
    }

    /// The uniform failure answer: a friendly message with a support code.
    /// The trace already holds the technical detail.
    fn error_response(
        &self,
        trace: ReasoningTrace,
        classification: Classification,
        code: &str,
        started: Instant,
    ) -> ChatResponse {
        ChatResponse {
            message: format!(
                "Something went wrong while answering your question. Please try again, or contact support with code {code}."
            ),
            status: ResponseStatus::Error,
            suggestions: vec![
                "Try rephrasing your question".to_string(),
                "Check a provider's availability".to_string(),
                "Book an appointment".to_string(),
            ],
            trace,
            intent: classification.intent,
            confidence: classification.confidence,
            sql: None,
            row_count: None,
            processing_time_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
