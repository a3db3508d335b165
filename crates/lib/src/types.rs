//! # Shared Types
//!
//! The data types passed between pipeline stages: result rows, bound SQL
//! parameters, generated queries and the final [`ChatResponse`], plus the
//! [`ChatPipelineBuilder`] used to assemble a pipeline from its providers.

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::executor::QueryExecutor;
use crate::formatter::ResultFormatter;
use crate::intent::{Intent, IntentClassifier};
use crate::providers::ai::embedding::Embedder;
use crate::providers::ai::AiProvider;
use crate::providers::db::storage::Storage;
use crate::schema::{SchemaCatalog, SchemaIndex};
use crate::sqlgen::SqlGenerator;
use crate::trace::{NullTraceSink, ReasoningTrace, TraceSink};
use crate::ChatPipeline;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// One result row, mapping column names to JSON values.
pub type Row = serde_json::Map<String, Value>;

/// A value bound to a `?` placeholder in generated SQL.
///
/// User-derived filter values travel as parameters, never as SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Integer(v) => write!(f, "{v}"),
            SqlParam::Real(v) => write!(f, "{v}"),
            SqlParam::Text(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Integer(v)
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        SqlParam::Integer(i64::from(v))
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Real(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

/// How a SQL query was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    Llm,
    RuleBased,
}

impl fmt::Display for GenerationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMethod::Llm => f.write_str("llm"),
            GenerationMethod::RuleBased => f.write_str("rule_based"),
        }
    }
}

/// A read-only, parameterized SQL query ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    /// Tables the query touches, all drawn from the retrieved schema subset.
    pub tables_referenced: BTreeSet<String>,
    pub method: GenerationMethod,
}

impl GeneratedQuery {
    /// A short single-line preview of the SQL for traces and logs.
    pub fn preview(&self) -> String {
        let flat = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.len() > 120 {
            let cut = flat
                .char_indices()
                .take_while(|(i, _)| *i <= 120)
                .last()
                .map(|(i, _)| i)
                .unwrap_or(0);
            format!("{}…", &flat[..cut])
        } else {
            flat
        }
    }
}

/// Overall outcome of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    NoResults,
    Error,
    NeedClarification,
}

/// The complete answer to one user turn, including the reasoning trace.
///
/// `respond` always returns one of these; failures surface as
/// `status = error` with a friendly message, never as an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub status: ResponseStatus,
    pub suggestions: Vec<String>,
    pub trace: ReasoningTrace,
    pub intent: Intent,
    pub confidence: f32,
    /// The executed SQL, when the turn got that far.
    pub sql: Option<String>,
    pub row_count: Option<usize>,
    pub processing_time_ms: u64,
}

/// Builds a [`ChatPipeline`], validating that required providers are present.
///
/// A storage provider is mandatory. The AI provider, embedder and trace sink
/// are optional; the pipeline degrades to rule-based generation, keyword
/// retrieval and silent tracing respectively when they are absent.
#[derive(Debug, Default)]
pub struct ChatPipelineBuilder {
    storage: Option<Box<dyn Storage>>,
    ai_provider: Option<Box<dyn AiProvider>>,
    embedder: Option<Arc<dyn Embedder>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    schema_ddl: Option<String>,
    config: PipelineConfig,
}

impl ChatPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage provider queries run against. Required.
    pub fn storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the AI provider used for LLM generation and intent refinement.
    pub fn ai_provider(mut self, provider: Box<dyn AiProvider>) -> Self {
        self.ai_provider = Some(provider);
        self
    }

    /// Sets the embedding backend for vector retrieval.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Sets the sink that receives reasoning steps as they are appended.
    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// Loads the schema from an annotated DDL script instead of live
    /// introspection of the storage provider.
    pub fn schema_ddl(mut self, ddl: impl Into<String>) -> Self {
        self.schema_ddl = Some(ddl.into());
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ChatPipeline, PipelineError> {
        let storage: Arc<dyn Storage> = self
            .storage
            .map(Arc::from)
            .ok_or(PipelineError::MissingStorageProvider)?;

        let catalog = match self.schema_ddl {
            Some(ddl) => SchemaCatalog::from_ddl(ddl),
            None => SchemaCatalog::live(Arc::clone(&storage)),
        };
        let index = SchemaIndex::new(self.embedder, self.config.retrieval.clone());
        let generator = SqlGenerator::new(
            self.ai_provider.clone(),
            storage.language().to_string(),
            storage.name().to_string(),
            self.config.generator.clone(),
        )?;
        let classifier = IntentClassifier::new(self.ai_provider)?;
        let executor = QueryExecutor::new(Arc::clone(&storage), self.config.retry.clone());
        let formatter = ResultFormatter::new(self.config.formatter.clone());
        let trace_sink = self.trace_sink.unwrap_or_else(|| Arc::new(NullTraceSink));

        Ok(ChatPipeline {
            catalog: Arc::new(catalog),
            index: Arc::new(index),
            generator,
            executor,
            formatter,
            classifier,
            trace_sink,
            config: self.config,
        })
    }
}
