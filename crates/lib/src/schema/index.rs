//! # Schema Index
//!
//! Maps free-text user queries to the most relevant subset of schema tables.
//! The primary path ranks tables by cosine similarity between an embedding of
//! the query and per-table embeddings built at index time; when no embedding
//! backend is available (or it fails), retrieval degrades to keyword matching
//! and finally to the complete schema. `retrieve` never fails: worst case the
//! caller receives every table with a low confidence score.

use crate::config::RetrievalConfig;
use crate::providers::ai::embedding::Embedder;
use crate::schema::{SchemaSnapshot, TableDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The core conversational tables used when nothing in the query matches.
const CORE_TABLES: &[&str] = &["Patient", "Employee", "Appointment"];

/// Domain terms users type, mapped to the tables that answer them. Checked in
/// order, so results are deterministic for a given query.
const KEYWORD_MAP: &[(&str, &[&str])] = &[
    ("patient", &["Patient"]),
    ("client", &["Patient"]),
    ("employee", &["Employee"]),
    ("doctor", &["Employee"]),
    ("provider", &["Employee"]),
    ("practitioner", &["Employee"]),
    ("staff", &["Employee"]),
    ("appointment", &["Appointment", "AppointmentStatus"]),
    ("booking", &["Appointment", "AppointmentStatus"]),
    ("visit", &["Appointment"]),
    ("session", &["Appointment"]),
    ("availability", &["Employee", "EmployeeAvailabilityDateTime"]),
    ("available", &["Employee", "EmployeeAvailabilityDateTime"]),
    ("schedule", &["Employee", "EmployeeAvailabilityDateTime"]),
    ("free", &["Employee", "EmployeeAvailabilityDateTime"]),
    ("auth", &["Auth"]),
    ("login", &["Auth"]),
    ("location", &["Location", "Site"]),
    ("site", &["Site"]),
    ("clinic", &["Location", "Site"]),
    ("service", &["ServiceType"]),
    ("treatment", &["TreatmentType"]),
    ("gender", &["Gender"]),
];

/// How a retrieval result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    VectorSearch,
    KeywordFallback,
    CompleteSchema,
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMethod::VectorSearch => f.write_str("vector_search"),
            RetrievalMethod::KeywordFallback => f.write_str("keyword_fallback"),
            RetrievalMethod::CompleteSchema => f.write_str("complete_schema"),
        }
    }
}

/// The schema subset selected for one query, most relevant first.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub tables: Vec<TableDescriptor>,
    pub confidence: f32,
    pub method: RetrievalMethod,
}

impl RetrievalResult {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }
}

/// A point-in-time summary of the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub indexed_tables: usize,
    pub embedded_tables: usize,
    /// The strongest retrieval method the index can currently serve.
    pub method_available: RetrievalMethod,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    table: String,
    document: String,
    vector: Option<Vec<f32>>,
}

#[derive(Debug)]
struct IndexState {
    snapshot: Arc<SchemaSnapshot>,
    entries: Vec<IndexEntry>,
}

impl IndexState {
    fn empty() -> Self {
        Self {
            snapshot: Arc::new(SchemaSnapshot::empty()),
            entries: Vec::new(),
        }
    }

    /// True when every indexed table carries an embedding, so vector search
    /// ranks the whole schema rather than a biased subset.
    fn vectors_ready(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.vector.is_some())
    }
}

/// Retrieves the schema subset relevant to a query, with graceful fallbacks.
#[derive(Debug)]
pub struct SchemaIndex {
    embedder: Option<Arc<dyn Embedder>>,
    config: RetrievalConfig,
    state: RwLock<Arc<IndexState>>,
}

impl SchemaIndex {
    pub fn new(embedder: Option<Arc<dyn Embedder>>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            config,
            state: RwLock::new(Arc::new(IndexState::empty())),
        }
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Rebuilds the index from `snapshot`, replacing all prior entries.
    ///
    /// Embedding failures degrade the index to keyword retrieval instead of
    /// failing the rebuild; a later call with the same snapshot retries them.
    /// Re-indexing an unchanged, fully embedded snapshot is a no-op.
    pub async fn index(&self, snapshot: Arc<SchemaSnapshot>) {
        {
            let state = self.state.read().await;
            let complete = self.embedder.is_none() || state.vectors_ready();
            if state.snapshot.hash() == snapshot.hash() && !state.snapshot.is_empty() && complete {
                debug!("Schema index already current (hash {}); skipping rebuild.", snapshot.hash());
                return;
            }
        }

        let mut entries = Vec::with_capacity(snapshot.len());
        for table in snapshot.tables() {
            let document = document_for_table(table);
            let vector = match &self.embedder {
                Some(embedder) => match embedder.embed(&document).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(
                            "Embedding failed for table '{}'; retrieval degrades to keywords: {e}",
                            table.name
                        );
                        None
                    }
                },
                None => None,
            };
            entries.push(IndexEntry {
                table: table.name.clone(),
                document,
                vector,
            });
        }

        let embedded = entries.iter().filter(|e| e.vector.is_some()).count();
        debug!("Indexed {} tables ({embedded} with embeddings).", entries.len());
        *self.state.write().await = Arc::new(IndexState { snapshot, entries });
    }

    /// Selects the tables most relevant to `query`.
    ///
    /// Never fails and never returns an error: the fallback chain is vector
    /// search, then keyword matching, then the core tables, then the complete
    /// schema.
    pub async fn retrieve(&self, query: &str) -> RetrievalResult {
        let state = Arc::clone(&*self.state.read().await);

        if state.snapshot.is_empty() {
            debug!("Retrieve called before any schema was indexed.");
            return RetrievalResult {
                tables: Vec::new(),
                confidence: self.config.complete_confidence,
                method: RetrievalMethod::CompleteSchema,
            };
        }

        if let Some(embedder) = &self.embedder {
            if state.vectors_ready() {
                match embedder.embed(query).await {
                    Ok(query_vector) => {
                        if let Some(result) = self.vector_search(&state, &query_vector) {
                            return result;
                        }
                        debug!("No table above the similarity floor; falling back to keywords.");
                    }
                    Err(e) => {
                        warn!("Query embedding failed; falling back to keyword retrieval: {e}")
                    }
                }
            }
        }

        if let Some(result) = self.keyword_search(&state, query) {
            return result;
        }

        // No keyword matched anything. Prefer the core conversational tables
        // over dumping the whole schema when they exist here.
        let core: Vec<TableDescriptor> = CORE_TABLES
            .iter()
            .filter_map(|name| state.snapshot.table(name).cloned())
            .collect();
        if !core.is_empty() {
            debug!("No retrieval signal in query; defaulting to {} core tables.", core.len());
            return RetrievalResult {
                tables: core,
                confidence: self.config.keyword_confidence,
                method: RetrievalMethod::KeywordFallback,
            };
        }

        debug!("No retrieval signal and no core tables; returning the complete schema.");
        RetrievalResult {
            tables: state.snapshot.tables().cloned().collect(),
            confidence: self.config.complete_confidence,
            method: RetrievalMethod::CompleteSchema,
        }
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.state.read().await;
        let embedded = state.entries.iter().filter(|e| e.vector.is_some()).count();
        let method_available = if self.embedder.is_some() && state.vectors_ready() {
            RetrievalMethod::VectorSearch
        } else if !state.entries.is_empty() {
            RetrievalMethod::KeywordFallback
        } else {
            RetrievalMethod::CompleteSchema
        };
        IndexStatus {
            indexed_tables: state.entries.len(),
            embedded_tables: embedded,
            method_available,
        }
    }

    fn vector_search(&self, state: &IndexState, query_vector: &[f32]) -> Option<RetrievalResult> {
        let mut scored: Vec<(f32, &str)> = state
            .entries
            .iter()
            .filter_map(|entry| {
                let vector = entry.vector.as_deref()?;
                let score = cosine_similarity(query_vector, vector);
                (score >= self.config.similarity_floor).then_some((score, entry.table.as_str()))
            })
            .collect();
        if scored.is_empty() {
            return None;
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_k);
        let confidence = scored.iter().map(|(s, _)| *s).sum::<f32>() / scored.len() as f32;
        let tables: Vec<TableDescriptor> = scored
            .iter()
            .filter_map(|(_, name)| state.snapshot.table(name).cloned())
            .collect();
        debug!(
            "Vector search selected {:?} (confidence {confidence:.2}).",
            tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        Some(RetrievalResult {
            tables,
            confidence,
            method: RetrievalMethod::VectorSearch,
        })
    }

    /// Unions the table sets of every domain keyword found in the query, then
    /// widens the set with join-reachable neighbors up to `top_k` tables so
    /// the generator has what it needs for joins.
    fn keyword_search(&self, state: &IndexState, query: &str) -> Option<RetrievalResult> {
        let lowered = query.to_lowercase();
        let mut names: Vec<String> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for (keyword, tables) in KEYWORD_MAP {
            if !lowered.contains(keyword) {
                continue;
            }
            for table in *tables {
                if state.snapshot.table(table).is_some() && seen.insert(table.to_string()) {
                    names.push(table.to_string());
                }
            }
        }
        if names.is_empty() {
            return None;
        }

        let direct = names.len();
        for start in names.clone() {
            if names.len() >= self.config.top_k {
                break;
            }
            for neighbor in state.snapshot.related_tables(&start, 1) {
                if names.len() >= self.config.top_k {
                    break;
                }
                if seen.insert(neighbor.clone()) {
                    names.push(neighbor);
                }
            }
        }

        debug!(
            "Keyword retrieval matched {direct} tables directly, {} after join widening: {names:?}",
            names.len()
        );
        let tables = names
            .iter()
            .filter_map(|name| state.snapshot.table(name).cloned())
            .collect();
        Some(RetrievalResult {
            tables,
            confidence: self.config.keyword_confidence,
            method: RetrievalMethod::KeywordFallback,
        })
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-length
/// inputs rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x).powi(2);
        norm_b += f64::from(*y).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// The text embedded for one table: name, description, columns with types,
/// keys, and the business synonyms users actually say.
fn document_for_table(table: &TableDescriptor) -> String {
    let mut doc = format!("Table {}: {}", table.name, table.description);
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.data_type))
        .collect();
    doc.push_str(&format!("\nColumns: {}", columns.join(", ")));
    if !table.primary_keys.is_empty() {
        let pks: Vec<&str> = table.primary_keys.iter().map(String::as_str).collect();
        doc.push_str(&format!("\nPrimary key: {}", pks.join(", ")));
    }
    if !table.foreign_keys.is_empty() {
        let fks: Vec<String> = table
            .foreign_keys
            .iter()
            .map(|fk| format!("{} references {}.{}", fk.column, fk.referenced_table, fk.referenced_column))
            .collect();
        doc.push_str(&format!("\nForeign keys: {}", fks.join(", ")));
    }
    let synonyms = business_synonyms(&table.name);
    if !synonyms.is_empty() {
        doc.push_str(&format!("\nAlso known as: {}", synonyms.join(", ")));
    }
    doc
}

/// Alternative names for a table, folded into its embedding document so
/// colloquial queries still land on the right table.
fn business_synonyms(table: &str) -> &'static [&'static str] {
    match table {
        "Patient" => &["client", "person", "customer"],
        "Employee" => &["doctor", "provider", "practitioner", "staff", "clinician"],
        "Appointment" => &["booking", "session", "visit", "slot"],
        "AppointmentStatus" => &["status", "state", "confirmed", "cancelled"],
        "EmployeeAvailabilityDateTime" => &["availability", "schedule", "working hours", "free time"],
        "Auth" => &["login", "account", "credentials", "user"],
        "Location" | "Site" => &["clinic", "office", "branch"],
        "ServiceType" => &["service", "offering"],
        "TreatmentType" => &["treatment", "therapy", "procedure"],
        "Gender" => &["sex"],
        _ => &[],
    }
}
