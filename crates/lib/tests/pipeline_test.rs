//! End-to-end tests for `ChatPipeline::respond`: the full turn from a chat
//! message to a formatted answer, including the repair loop, the booking
//! detour, schema drift between turns, and trace streaming.

mod common;

use std::sync::Arc;

use carerag::{
    BufferTraceSink, ChatPipeline, Intent, PipelineError, ReasoningStep, ResponseStatus, SqlParam,
    StepCategory, TraceSink,
};
use common::{
    availability_row, setup_tracing, MockAiProvider, ScriptStep, ScriptedStorage, CLINIC_DDL,
};
use serde_json::json;

async fn ddl_pipeline(storage: &ScriptedStorage) -> ChatPipeline {
    let pipeline = ChatPipeline::builder()
        .storage(Box::new(storage.clone()))
        .schema_ddl(CLINIC_DDL)
        .build()
        .expect("pipeline should build");
    pipeline.initialize().await.expect("initialize");
    pipeline
}

#[tokio::test]
async fn test_availability_turn_end_to_end_without_ai() {
    setup_tracing();

    // 1. One scripted result set: Jon Snow works Wednesdays, no conflicts.
    let storage = ScriptedStorage::new(vec![ScriptStep::Rows(vec![availability_row(
        "Jon", "Snow", 3, "09:00:00", "17:00:00", 0,
    )])]);
    let pipeline = ddl_pipeline(&storage).await;

    let response = pipeline
        .respond("turn-1", "What time is Employee Jon Snow available on Wednesday?")
        .await;

    // 2. The turn resolves through the availability template, no AI involved.
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.intent, Intent::CheckAvailability);
    assert!(response.message.contains("Here is the availability I found (1 slot(s)):"));
    assert!(response
        .message
        .contains("• Jon Snow: Wednesday 09:00-17:00 (Fully Available)"));
    assert_eq!(response.row_count, Some(1));

    // 3. The executed SQL is the parameterized template.
    let sql = response.sql.as_deref().expect("sql should be recorded");
    assert!(sql.contains("INNER JOIN EmployeeAvailabilityDateTime a"));
    let calls = storage.calls.read().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains(&SqlParam::Integer(3)));
    assert!(calls[0].1.contains(&SqlParam::Text("%jon%".to_string())));

    // 4. Intent, extraction, retrieval, query, execution, completion.
    let categories: Vec<StepCategory> =
        response.trace.steps().iter().map(|s| s.category).collect();
    assert_eq!(
        categories,
        vec![
            StepCategory::Intent,
            StepCategory::Extraction,
            StepCategory::Schema,
            StepCategory::Query,
            StepCategory::Execution,
            StepCategory::Completion,
        ]
    );
}

#[tokio::test]
async fn test_empty_message_asks_for_input() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![]);
    let pipeline = ddl_pipeline(&storage).await;

    let response = pipeline.respond("turn-1", "   ").await;

    assert_eq!(response.status, ResponseStatus::NeedClarification);
    assert_eq!(
        response.message,
        "I did not catch that. What would you like to know?"
    );
    assert_eq!(response.intent, Intent::General);
    assert_eq!(response.confidence, 0.0);
    assert!(response.sql.is_none());
    assert!(!response.suggestions.is_empty());
    // Nothing ran against the database.
    assert_eq!(storage.call_count(), 0);
}

#[tokio::test]
async fn test_booking_intent_asks_for_details() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![]);
    let pipeline = ddl_pipeline(&storage).await;

    // 1. Booking is conversational: no SQL, just a clarification prompt.
    let response = pipeline
        .respond("turn-1", "Book an appointment with Dr. Smith")
        .await;
    assert_eq!(response.status, ResponseStatus::NeedClarification);
    assert_eq!(response.intent, Intent::BookAppointment);
    assert!(response.message.contains("Who would you like to see"));
    assert!(response.sql.is_none());
    assert_eq!(storage.call_count(), 0);
    let last = response.trace.steps().last().expect("trace steps");
    assert_eq!(last.category, StepCategory::Completion);
    assert!(last.message.contains("Booking flow needs details"));

    // 2. Cancellation takes the same detour with its own wording.
    let response = pipeline.respond("turn-2", "Cancel my appointment").await;
    assert_eq!(response.status, ResponseStatus::NeedClarification);
    assert_eq!(response.intent, Intent::CancelAppointment);
    assert!(response.message.contains("cancel"));
    assert!(response.sql.is_none());
}

#[tokio::test]
async fn test_rule_based_execution_failure_reports_support_code() {
    setup_tracing();

    // Rule-based SQL gets no repair and no second fallback, so a fatal
    // database error surfaces as the uniform failure answer.
    let storage = ScriptedStorage::new(vec![ScriptStep::Fail(
        "no such column: Oops".to_string(),
    )]);
    let pipeline = ddl_pipeline(&storage).await;

    let response = pipeline.respond("turn-1", "How many patients are active?").await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.contains("EXEC-FAIL"));
    // The raw driver error stays in the trace, never in the user answer.
    assert!(!response.message.contains("no such column"));
    assert!(response
        .trace
        .steps()
        .iter()
        .any(|s| s.category == StepCategory::Error && s.message.contains("no such column: Oops")));
    assert!(response.sql.is_none());
    assert_eq!(storage.call_count(), 1);
}

#[tokio::test]
async fn test_llm_repair_retries_before_succeeding() {
    setup_tracing();

    // 1. Scripted AI: intent refinement, a bad first query, then the repair.
    let ai = MockAiProvider::new(vec![
        r#"{"intent": "data_retrieval", "confidence": 0.9}"#.to_string(),
        "```sql\nSELECT Oops FROM Employee\n```".to_string(),
        "```sql\nSELECT FirstName FROM Employee\n```".to_string(),
    ]);
    let row = json!({"FirstName": "Jon", "LastName": "Snow"})
        .as_object()
        .expect("row object")
        .clone();
    let storage = ScriptedStorage::new(vec![
        ScriptStep::Fail("no such column: Oops".to_string()),
        ScriptStep::Rows(vec![row]),
    ]);

    let pipeline = ChatPipeline::builder()
        .storage(Box::new(storage.clone()))
        .ai_provider(Box::new(ai.clone()))
        .schema_ddl(CLINIC_DDL)
        .build()
        .expect("pipeline should build");
    pipeline.initialize().await.expect("initialize");

    let response = pipeline.respond("turn-1", "Which employees are listed?").await;

    // 2. The repaired query succeeded on the second execution.
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.sql.as_deref(), Some("SELECT FirstName FROM Employee"));
    assert!(response.message.contains("Jon Snow"));
    assert_eq!(response.row_count, Some(1));

    // 3. Three AI calls: classify, generate, regenerate. Two executions.
    assert_eq!(ai.call_count(), 3);
    let calls = storage.calls.read().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "SELECT Oops FROM Employee");
    assert_eq!(calls[1].0, "SELECT FirstName FROM Employee");

    // 4. The trace narrates the repair.
    assert!(response
        .trace
        .steps()
        .iter()
        .any(|s| s.message.contains("Regenerated SQL (attempt 2)")));
}

#[tokio::test]
async fn test_trace_streams_to_sink_as_steps_append() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![ScriptStep::Rows(vec![availability_row(
        "Jon", "Snow", 1, "08:00:00", "12:00:00", 0,
    )])]);
    let sink = Arc::new(BufferTraceSink::new());
    let pipeline = ChatPipeline::builder()
        .storage(Box::new(storage.clone()))
        .schema_ddl(CLINIC_DDL)
        .trace_sink(Arc::clone(&sink) as Arc<dyn TraceSink>)
        .build()
        .expect("pipeline should build");
    pipeline.initialize().await.expect("initialize");

    let response = pipeline
        .respond("session-42", "Which doctors are available on Monday?")
        .await;
    assert_eq!(response.status, ResponseStatus::Success);

    // Every step reached the sink, in order, tagged with the session.
    let emitted: Vec<(String, ReasoningStep)> = sink.emitted();
    assert_eq!(emitted.len(), response.trace.len());
    for ((session, streamed), kept) in emitted.iter().zip(response.trace.steps()) {
        assert_eq!(session, "session-42");
        assert_eq!(streamed.message, kept.message);
        assert_eq!(streamed.category, kept.category);
    }
}

#[tokio::test]
async fn test_live_catalog_reports_drift_between_turns() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![
        ScriptStep::Rows(vec![]),
        ScriptStep::Rows(vec![]),
    ]);

    // No DDL: the catalog introspects the storage backend directly.
    let pipeline = ChatPipeline::builder()
        .storage(Box::new(storage.clone()))
        .build()
        .expect("pipeline should build");
    pipeline.initialize().await.expect("initialize");

    // 1. First turn sees a stable schema.
    let response = pipeline.respond("turn-1", "Show all patients").await;
    assert!(!response
        .trace
        .steps()
        .iter()
        .any(|s| s.message.contains("Schema changed since the last turn")));

    // 2. A column appears in the backend between turns.
    let mut tables = common::clinic_tables();
    let patient = tables
        .iter_mut()
        .find(|t| t.name == "Patient")
        .expect("Patient table");
    patient.columns.push(carerag::schema::ColumnDescriptor::new(
        "PreferredName",
        carerag::schema::ColumnType::Text { length: Some(100) },
    ));
    storage.set_tables(tables);

    // 3. The next turn reports the drift before answering.
    let response = pipeline.respond("turn-2", "Show all patients").await;
    assert!(response.trace.steps().iter().any(|s| {
        s.category == StepCategory::Schema
            && s.message.contains("Schema changed since the last turn")
            && s.message.contains("+1 column(s)")
    }));
}

#[tokio::test]
async fn test_builder_requires_storage() {
    let result = ChatPipeline::builder().schema_ddl(CLINIC_DDL).build();
    assert!(matches!(result, Err(PipelineError::MissingStorageProvider)));
}

#[derive(Debug)]
struct PanickingSink;

impl TraceSink for PanickingSink {
    fn notify(&self, _session_id: &str, _step: &ReasoningStep) {
        panic!("sink exploded");
    }
}

#[tokio::test]
async fn test_panicking_trace_sink_does_not_break_the_turn() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![ScriptStep::Rows(vec![])]);
    let pipeline = ChatPipeline::builder()
        .storage(Box::new(storage.clone()))
        .schema_ddl(CLINIC_DDL)
        .trace_sink(Arc::new(PanickingSink))
        .build()
        .expect("pipeline should build");
    pipeline.initialize().await.expect("initialize");

    // The sink blows up on every step; the turn still completes and the
    // trace is still attached to the response.
    let response = pipeline.respond("turn-1", "Show all patients").await;
    assert_eq!(response.status, ResponseStatus::NoResults);
    assert!(!response.trace.is_empty());
}
