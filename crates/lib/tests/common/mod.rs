#![allow(dead_code)]
//! # Common Test Utilities
//!
//! Shared doubles and fixtures for the integration tests: a scripted AI
//! provider, deterministic embedders, a scripted storage backend and the
//! annotated clinic schema the suites run against.

use async_trait::async_trait;
use carerag::providers::ai::{AiProvider, Embedder};
use carerag::providers::db::storage::Storage;
use carerag::schema::TableDescriptor;
use carerag::types::{GeneratedQuery, GenerationMethod, Row, SqlParam};
use carerag::{parse_ddl, PipelineError};
use dotenvy::dotenv;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Once, RwLock};

static INIT: Once = Once::new();

/// Initializes the tracing subscriber and loads .env for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        dotenv().ok();
        tracing_subscriber::fmt::init();
    });
}

// --- Mock AI Provider for Logic Testing ---

/// Replays a scripted sequence of responses and records every prompt pair.
#[derive(Clone, Debug)]
pub struct MockAiProvider {
    pub call_history: Arc<RwLock<Vec<(String, String)>>>,
    pub responses: Arc<RwLock<Vec<String>>>,
}

impl MockAiProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            call_history: Arc::new(RwLock::new(Vec::new())),
            responses: Arc::new(RwLock::new(responses.into_iter().rev().collect())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_history.read().unwrap().len()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, PipelineError> {
        self.call_history
            .write()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        if let Some(response) = self.responses.write().unwrap().pop() {
            Ok(response)
        } else {
            Ok("Default mock response".to_string())
        }
    }
}

// --- Mock embedders ---

/// Keyword axes the mock embedder projects text onto. The vector carries one
/// extra slot used as the fallback direction for text matching no axis, so
/// such text scores zero against every table document.
const EMBED_AXES: [&str; 6] = [
    "patient",
    "employee",
    "appointment",
    "availability",
    "location",
    "service",
];

/// A deterministic embedder: each axis is 1.0 when the text mentions it.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    pub calls: Arc<RwLock<usize>>,
}

impl MockEmbedder {
    pub fn call_count(&self) -> usize {
        *self.calls.read().unwrap()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, PipelineError> {
        *self.calls.write().unwrap() += 1;
        let lowered = input.to_lowercase();
        let mut vector = vec![0.0f32; EMBED_AXES.len() + 1];
        for (i, axis) in EMBED_AXES.iter().enumerate() {
            if lowered.contains(axis) {
                vector[i] = 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[EMBED_AXES.len()] = 1.0;
        }
        Ok(vector)
    }
}

/// An embedder whose backend is always down.
#[derive(Debug)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _input: &str) -> Result<Vec<f32>, PipelineError> {
        Err(PipelineError::AiApi("embedding backend offline".to_string()))
    }
}

// --- Scripted Storage Provider for Testing ---

/// One scripted outcome for [`ScriptedStorage::execute_query`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Rows(Vec<Row>),
    Fail(String),
}

/// Replays a script of query outcomes and records every SQL statement with
/// its bound parameters.
///
/// Introspection serves the clinic fixture tables by default; tests can swap
/// the table set mid-run to simulate a migration, or flip the failure switch
/// to simulate a lost connection.
#[derive(Clone, Debug)]
pub struct ScriptedStorage {
    pub calls: Arc<RwLock<Vec<(String, Vec<SqlParam>)>>>,
    script: Arc<RwLock<Vec<ScriptStep>>>,
    tables: Arc<RwLock<Vec<TableDescriptor>>>,
    fail_introspection: Arc<RwLock<bool>>,
}

impl ScriptedStorage {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            script: Arc::new(RwLock::new(script.into_iter().rev().collect())),
            tables: Arc::new(RwLock::new(clinic_tables())),
            fail_introspection: Arc::new(RwLock::new(false)),
        }
    }

    /// Replaces the tables served by introspection.
    pub fn set_tables(&self, tables: Vec<TableDescriptor>) {
        *self.tables.write().unwrap() = tables;
    }

    /// Makes `list_tables` and `table_schema` fail until switched back.
    pub fn fail_introspection(&self, fail: bool) {
        *self.fail_introspection.write().unwrap() = fail;
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Storage for ScriptedStorage {
    fn name(&self) -> &str {
        "MockClinicDB"
    }

    fn language(&self) -> &str {
        "SQL"
    }

    async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, PipelineError> {
        self.calls
            .write()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        match self.script.write().unwrap().pop() {
            Some(ScriptStep::Rows(rows)) => Ok(rows),
            Some(ScriptStep::Fail(message)) => Err(PipelineError::StorageOperationFailed(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn table_schema(&self, table_name: &str) -> Result<TableDescriptor, PipelineError> {
        if *self.fail_introspection.read().unwrap() {
            return Err(PipelineError::StorageConnection(
                "connection refused".to_string(),
            ));
        }
        self.tables
            .read()
            .unwrap()
            .iter()
            .find(|t| t.name == table_name)
            .cloned()
            .ok_or_else(|| {
                PipelineError::StorageOperationFailed(format!(
                    "Table '{table_name}' not found in the mock catalog"
                ))
            })
    }

    async fn list_tables(&self) -> Result<Vec<String>, PipelineError> {
        if *self.fail_introspection.read().unwrap() {
            return Err(PipelineError::StorageConnection(
                "connection refused".to_string(),
            ));
        }
        Ok(self
            .tables
            .read()
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect())
    }
}

// --- Fixtures ---

/// The annotated clinic schema used across the suites, in the T-SQL export
/// shape the parser expects.
pub const CLINIC_DDL: &str = r#"
-- Table: Patient
-- Registered clinic patients and their contact details.
CREATE TABLE [dbo].[Patient] (
    [PatientId] INT NOT NULL,
    [FirstName] NVARCHAR(100) NOT NULL,
    [LastName] NVARCHAR(100) NOT NULL,
    [DateOfBirth] DATE,
    [Email] NVARCHAR(255),
    [Active] BIT NOT NULL DEFAULT ((1)),
    PRIMARY KEY CLUSTERED ([PatientId])
);

-- Table: Employee
-- Clinic staff who deliver appointments, with their job titles.
CREATE TABLE [dbo].[Employee] (
    [EmployeeId] INT NOT NULL,
    [FirstName] NVARCHAR(100) NOT NULL,
    [LastName] NVARCHAR(100) NOT NULL,
    [JobTitle] NVARCHAR(150),
    [Email] NVARCHAR(255),
    [Active] BIT NOT NULL DEFAULT ((1)),
    PRIMARY KEY CLUSTERED ([EmployeeId])
);

-- Table: EmployeeAvailabilityDateTime
-- Weekly working windows per employee; WeekDay is ISO, Monday = 1.
CREATE TABLE [dbo].[EmployeeAvailabilityDateTime] (
    [EmployeeAvailabilityDateTimeId] INT NOT NULL,
    [EmployeeId] INT NOT NULL,
    [WeekDay] INT NOT NULL,
    [AvailableTimeFrom] TIME NOT NULL,
    [AvailableTimeTo] TIME NOT NULL,
    PRIMARY KEY CLUSTERED ([EmployeeAvailabilityDateTimeId]),
    CONSTRAINT [FK_EmployeeAvailability_Employee] FOREIGN KEY ([EmployeeId]) REFERENCES [dbo].[Employee] ([EmployeeId])
);

-- Table: Appointment
-- Booked visits linking a patient to an employee at a point in time.
CREATE TABLE [dbo].[Appointment] (
    [AppointmentId] INT NOT NULL,
    [PatientId] INT NOT NULL,
    [EmployeeId] INT NOT NULL,
    [AppointmentDateTime] DATETIME NOT NULL,
    [AppointmentStatusId] INT NOT NULL,
    [Notes] NVARCHAR(MAX),
    PRIMARY KEY CLUSTERED ([AppointmentId]),
    CONSTRAINT [FK_Appointment_Patient] FOREIGN KEY ([PatientId]) REFERENCES [dbo].[Patient] ([PatientId]),
    CONSTRAINT [FK_Appointment_Employee] FOREIGN KEY ([EmployeeId]) REFERENCES [dbo].[Employee] ([EmployeeId]),
    CONSTRAINT [FK_Appointment_Status] FOREIGN KEY ([AppointmentStatusId]) REFERENCES [dbo].[AppointmentStatus] ([AppointmentStatusId])
);

-- Table: AppointmentStatus
-- Lookup of appointment states such as booked or cancelled.
CREATE TABLE [dbo].[AppointmentStatus] (
    [AppointmentStatusId] INT NOT NULL,
    [Name] NVARCHAR(50) NOT NULL,
    PRIMARY KEY CLUSTERED ([AppointmentStatusId])
);
"#;

/// The clinic fixture parsed into descriptors.
pub fn clinic_tables() -> Vec<TableDescriptor> {
    parse_ddl(CLINIC_DDL).expect("clinic DDL fixture should parse")
}

/// A result row in the shape the availability query projects.
pub fn availability_row(
    first: &str,
    last: &str,
    weekday: i64,
    from: &str,
    to: &str,
    conflicts: i64,
) -> Row {
    let mut row = Row::new();
    row.insert("EmployeeId".to_string(), json!(7));
    row.insert("FirstName".to_string(), json!(first));
    row.insert("LastName".to_string(), json!(last));
    row.insert("WeekDay".to_string(), json!(weekday));
    row.insert("AvailableTimeFrom".to_string(), json!(from));
    row.insert("AvailableTimeTo".to_string(), json!(to));
    row.insert("ConflictCount".to_string(), json!(conflicts));
    row
}

/// A bare LLM-shaped query for executor tests.
pub fn simple_query(sql: &str) -> GeneratedQuery {
    GeneratedQuery {
        sql: sql.to_string(),
        params: Vec::new(),
        tables_referenced: BTreeSet::new(),
        method: GenerationMethod::Llm,
    }
}
