//! Tests for SQL generation: the AI path with its validation gates, the
//! rule-based builder, and the availability template.

mod common;

use carerag::availability::build_availability_query;
use carerag::config::GeneratorConfig;
use carerag::intent::ExtractedEntities;
use carerag::sqlgen::{GenerationError, SqlGenerator};
use carerag::types::{GenerationMethod, SqlParam};
use chrono::{NaiveDate, Weekday};
use common::{clinic_tables, setup_tracing, MockAiProvider};

fn generator(ai: Option<MockAiProvider>) -> SqlGenerator {
    SqlGenerator::new(
        ai.map(|p| Box::new(p) as _),
        "SQL".to_string(),
        "MockClinicDB".to_string(),
        GeneratorConfig::default(),
    )
    .expect("generator should build")
}

fn today() -> NaiveDate {
    // A Tuesday, so weekday arithmetic has a fixed anchor.
    NaiveDate::from_ymd_opt(2026, 8, 25).expect("valid date")
}

#[tokio::test]
async fn test_llm_sql_is_unfenced_and_unparameterized() {
    setup_tracing();
    let ai = MockAiProvider::new(vec![
        "```sql\nSELECT FirstName FROM Employee LIMIT 5\n```".to_string()
    ]);
    let generator = generator(Some(ai));

    let query = generator
        .generate(
            "Show employee first names",
            &clinic_tables(),
            &ExtractedEntities::default(),
            today(),
        )
        .await
        .expect("generation should succeed");

    assert_eq!(query.sql, "SELECT FirstName FROM Employee LIMIT 5");
    assert_eq!(query.method, GenerationMethod::Llm);
    // AI-authored SQL carries its literals inline; the parameter list is
    // reserved for values the pipeline itself binds.
    assert!(query.params.is_empty());
    assert!(query.tables_referenced.contains("Employee"));
}

#[tokio::test]
async fn test_write_statement_degrades_to_rule_based() {
    setup_tracing();
    let ai = MockAiProvider::new(vec!["DROP TABLE Patient;".to_string()]);
    let generator = generator(Some(ai));

    let query = generator
        .generate(
            "Delete everything",
            &clinic_tables(),
            &ExtractedEntities::default(),
            today(),
        )
        .await
        .expect("fallback should produce a query");

    // The write attempt is rejected and the deterministic builder answers.
    assert_eq!(query.method, GenerationMethod::RuleBased);
    assert!(query.sql.starts_with("SELECT"));
}

#[tokio::test]
async fn test_smuggled_second_statement_is_rejected() {
    setup_tracing();
    let ai = MockAiProvider::new(vec!["SELECT 1; DROP TABLE Patient".to_string()]);
    let generator = generator(Some(ai));

    let query = generator
        .generate(
            "List one thing",
            &clinic_tables(),
            &ExtractedEntities::default(),
            today(),
        )
        .await
        .expect("fallback should produce a query");

    assert_eq!(query.method, GenerationMethod::RuleBased);
    assert!(!query.sql.contains("DROP"));
}

#[tokio::test]
async fn test_prompt_carries_schema_context_and_date() {
    setup_tracing();
    let ai = MockAiProvider::new(vec!["```sql\nSELECT 1\n```".to_string()]);
    let history = ai.call_history.clone();
    let generator = generator(Some(ai));

    generator
        .generate(
            "Which patients are active?",
            &clinic_tables(),
            &ExtractedEntities::default(),
            today(),
        )
        .await
        .expect("generation should succeed");

    let calls = history.read().unwrap();
    assert_eq!(calls.len(), 1);
    let (system_prompt, user_prompt) = &calls[0];

    // 1. The system prompt names the database and the query language.
    assert!(system_prompt.contains("MockClinicDB"));
    assert!(system_prompt.contains("SQL"));

    // 2. The user prompt grounds the model: schema blocks, join hints, the
    //    current date and the question itself.
    assert!(user_prompt.contains("# SCHEMA"));
    assert!(user_prompt.contains("## Patient: Registered clinic patients"));
    assert!(user_prompt.contains("[FK -> Employee.EmployeeId]"));
    assert!(user_prompt.contains("## Join hints"));
    assert!(user_prompt.contains("2026-08-25"));
    assert!(user_prompt.contains("Which patients are active?"));
}

#[tokio::test]
async fn test_rule_based_name_filter_binds_parameters() {
    setup_tracing();
    let generator = generator(None);
    let tables: Vec<_> = clinic_tables()
        .into_iter()
        .filter(|t| t.name == "Employee")
        .collect();
    let entities = ExtractedEntities {
        person_name: Some("Jon Snow".to_string()),
        ..Default::default()
    };

    let query = generator
        .rule_based(&tables, &entities)
        .expect("rule-based query");

    // 1. Anchored on Employee with its soft-delete filter.
    assert!(query.sql.contains("FROM Employee e"));
    assert!(query.sql.contains("e.Active = 1"));

    // 2. Each name word becomes one bound LIKE over the concatenated name.
    assert!(query
        .sql
        .contains("LOWER(e.FirstName || ' ' || e.LastName) LIKE ?"));
    assert_eq!(
        query.params,
        vec![
            SqlParam::Text("%jon%".to_string()),
            SqlParam::Text("%snow%".to_string())
        ]
    );

    // 3. Deterministic ordering and a row cap.
    assert!(query.sql.contains("ORDER BY e.EmployeeId"));
    assert!(query.sql.ends_with("LIMIT 10"));
    assert_eq!(query.method, GenerationMethod::RuleBased);
}

#[tokio::test]
async fn test_rule_based_joins_along_declared_foreign_keys() {
    setup_tracing();
    let generator = generator(None);
    let tables: Vec<_> = clinic_tables()
        .into_iter()
        .filter(|t| t.name == "Appointment" || t.name == "Patient")
        .collect();

    let query = generator
        .rule_based(&tables, &ExtractedEntities::default())
        .expect("rule-based query");

    // Appointment wins the anchor; Patient joins over the declared key.
    assert!(query.sql.contains("FROM Appointment a"));
    assert!(query
        .sql
        .contains("LEFT JOIN Patient p ON a.PatientId = p.PatientId"));
    assert!(query.tables_referenced.contains("Appointment"));
    assert!(query.tables_referenced.contains("Patient"));
}

#[tokio::test]
async fn test_repair_prompt_includes_failed_sql_and_error() {
    setup_tracing();
    let ai = MockAiProvider::new(vec![
        "```sql\nSELECT LastName FROM Employee\n```".to_string()
    ]);
    let history = ai.call_history.clone();
    let generator = generator(Some(ai));

    let repaired = generator
        .regenerate(
            "Show employee last names",
            &clinic_tables(),
            "SELECT Oops FROM Employee",
            "no such column: Oops",
        )
        .await
        .expect("repair should succeed");

    assert_eq!(repaired.sql, "SELECT LastName FROM Employee");
    let calls = history.read().unwrap();
    let (_, user_prompt) = &calls[0];
    assert!(user_prompt.contains("SELECT Oops FROM Employee"));
    assert!(user_prompt.contains("no such column: Oops"));
}

#[tokio::test]
async fn test_repair_without_provider_fails() {
    setup_tracing();
    let generator = generator(None);

    let err = generator
        .regenerate("anything", &clinic_tables(), "SELECT 1", "boom")
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Provider(_)));
}

#[tokio::test]
async fn test_availability_template_binds_date_weekday_and_name() {
    setup_tracing();
    let entities = ExtractedEntities {
        person_name: Some("Jon Snow".to_string()),
        weekday: Some(Weekday::Wed),
        ..Default::default()
    };

    let query = build_availability_query(&clinic_tables(), &entities, today())
        .expect("availability query");

    // 1. Employee joined to its weekly windows over the declared key.
    assert!(query.sql.contains("FROM Employee e"));
    assert!(query
        .sql
        .contains("INNER JOIN EmployeeAvailabilityDateTime a ON a.EmployeeId = e.EmployeeId"));

    // 2. The weekday filter and conflict count both use placeholders; the
    //    parameters land in placeholder order. Today is Tuesday 2026-08-25,
    //    so the next Wednesday is 2026-08-26 and Wednesday encodes as 3.
    assert!(query.sql.contains("a.WeekDay = ?"));
    assert!(query.sql.contains("AS ConflictCount"));
    assert_eq!(
        query.params,
        vec![
            SqlParam::Text("2026-08-26".to_string()),
            SqlParam::Integer(3),
            SqlParam::Text("%jon%".to_string()),
            SqlParam::Text("%snow%".to_string())
        ]
    );

    // 3. Output is ordered per provider, then weekday.
    assert!(query.sql.contains("ORDER BY e.EmployeeId, a.WeekDay"));
    assert_eq!(query.method, GenerationMethod::RuleBased);
    assert!(query.tables_referenced.contains("Appointment"));
}

#[tokio::test]
async fn test_availability_without_weekday_skips_conflict_count() {
    setup_tracing();
    let entities = ExtractedEntities {
        person_name: Some("Jon".to_string()),
        ..Default::default()
    };

    let query = build_availability_query(&clinic_tables(), &entities, today())
        .expect("availability query");

    // No target date can be derived, so no conflict subquery and no weekday
    // filter; the whole weekly schedule comes back.
    assert!(!query.sql.contains("ConflictCount"));
    assert!(!query.sql.contains("a.WeekDay = ?"));
    assert_eq!(query.params, vec![SqlParam::Text("%jon%".to_string())]);
}

#[tokio::test]
async fn test_availability_requires_the_window_table() {
    setup_tracing();
    let tables: Vec<_> = clinic_tables()
        .into_iter()
        .filter(|t| t.name == "Employee")
        .collect();

    let err = build_availability_query(&tables, &ExtractedEntities::default(), today())
        .unwrap_err();
    assert!(matches!(err, GenerationError::MissingAvailabilityTables(_)));
}
