//! # Schema Model
//!
//! The canonical, immutable description of the database the pipeline queries:
//! tables, columns, keys and relationships. A [`SchemaSnapshot`] is built once
//! per load, content-hashed for cheap drift detection, and replaced wholesale —
//! never mutated — so concurrent readers always work from a consistent schema.

pub mod catalog;
pub mod index;
pub mod parser;

pub use catalog::{CatalogStatus, SchemaCatalog, SchemaSource};
pub use index::{IndexStatus, RetrievalMethod, RetrievalResult, SchemaIndex};
pub use parser::parse_ddl;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Errors raised while loading or validating a schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to parse schema definition: {0}")]
    Parse(String),
    #[error("Schema introspection failed: {0}")]
    Introspection(String),
    #[error("Invalid definition for table `{table}`: {reason}")]
    InvalidTable { table: String, reason: String },
}

/// The semantic type of a column, normalized across vendors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    /// Character data; `length` is `None` for unbounded (`MAX`) columns.
    Text { length: Option<u32> },
    Date,
    Time,
    DateTime,
    Boolean,
    Decimal { precision: u8, scale: u8 },
    Float,
    /// A vendor type the parser does not normalize; kept verbatim.
    Other(String),
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => f.write_str("INT"),
            ColumnType::Text { length: Some(n) } => write!(f, "NVARCHAR({n})"),
            ColumnType::Text { length: None } => f.write_str("NVARCHAR(MAX)"),
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::Time => f.write_str("TIME"),
            ColumnType::DateTime => f.write_str("DATETIME"),
            ColumnType::Boolean => f.write_str("BIT"),
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            ColumnType::Float => f.write_str("FLOAT"),
            ColumnType::Other(raw) => f.write_str(raw),
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub default_value: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
            default_value: None,
        }
    }
}

/// A many-to-one reference from the owning table to another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// One database table with its columns and keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_keys: BTreeSet<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            columns: Vec::new(),
            primary_keys: BTreeSet::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Columns that carry human names or labels, used for default projections
    /// and name filters.
    pub fn name_like_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| {
                let lower = c.name.to_lowercase();
                lower.contains("name") || lower == "title"
            })
            .map(|c| c.name.as_str())
            .collect()
    }

    /// The soft-delete flag column, if the table has one.
    pub fn active_column(&self) -> Option<&str> {
        ["Active", "IsActive"]
            .into_iter()
            .find(|candidate| self.has_column(candidate))
    }

    /// The first date-bearing column, for date filters on this table.
    pub fn date_like_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| {
                matches!(c.data_type, ColumnType::Date | ColumnType::DateTime)
                    || c.name.to_lowercase().contains("date")
            })
            .map(|c| c.name.as_str())
    }

    /// Checks the structural invariants: primary keys and foreign-key columns
    /// must reference columns that exist on the table.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for pk in &self.primary_keys {
            if !self.has_column(pk) {
                return Err(SchemaError::InvalidTable {
                    table: self.name.clone(),
                    reason: format!("primary key `{pk}` is not a column"),
                });
            }
        }
        for fk in &self.foreign_keys {
            if !self.has_column(&fk.column) {
                return Err(SchemaError::InvalidTable {
                    table: self.name.clone(),
                    reason: format!("foreign key column `{}` is not a column", fk.column),
                });
            }
        }
        Ok(())
    }
}

/// Outgoing and incoming foreign-key edges for one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRelationships {
    /// Foreign keys declared on the table itself.
    pub outgoing: Vec<ForeignKeyRef>,
    /// `(owning table, foreign key)` pairs in other tables that reference this one.
    pub incoming: Vec<(String, ForeignKeyRef)>,
}

/// The complete schema at one point in time.
///
/// Immutable after construction; a refresh builds a new snapshot and swaps the
/// shared pointer, so readers never observe a half-updated table map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableDescriptor>,
    hash: String,
    loaded_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn empty() -> Self {
        Self::from_tables(Vec::new())
    }

    /// Builds a snapshot from a set of tables, computing the content hash.
    pub fn from_tables(tables: Vec<TableDescriptor>) -> Self {
        let tables: BTreeMap<String, TableDescriptor> =
            tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        let hash = compute_hash(&tables);
        Self {
            tables,
            hash,
            loaded_at: Utc::now(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn column_count(&self) -> usize {
        self.tables.values().map(|t| t.columns.len()).sum()
    }

    /// Foreign-key edges touching `table`, in both directions.
    pub fn relationships(&self, table: &str) -> TableRelationships {
        let mut rel = TableRelationships::default();
        if let Some(t) = self.tables.get(table) {
            rel.outgoing = t.foreign_keys.clone();
        }
        for (name, other) in &self.tables {
            if name == table {
                continue;
            }
            for fk in &other.foreign_keys {
                if fk.referenced_table == table {
                    rel.incoming.push((name.clone(), fk.clone()));
                }
            }
        }
        rel
    }

    /// Tables reachable from `start` over foreign-key edges (either direction)
    /// within `depth` hops, excluding `start` itself. Breadth-first, so closer
    /// tables come first.
    pub fn related_tables(&self, start: &str, depth: usize) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(start.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));
        let mut found = Vec::new();

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            let rel = self.relationships(&current);
            let neighbors: Vec<String> = rel
                .outgoing
                .into_iter()
                .map(|fk| fk.referenced_table)
                .chain(rel.incoming.into_iter().map(|(owner, _)| owner))
                .collect();
            for neighbor in neighbors {
                if self.tables.contains_key(&neighbor) && seen.insert(neighbor.clone()) {
                    found.push(neighbor.clone());
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }
        found
    }
}

/// `LEFT JOIN` fragments for every foreign key connecting two tables in `tables`.
///
/// Operates only on the supplied subset, so a generator using these fragments
/// stays grounded in the tables it was given.
pub fn join_suggestions(tables: &[TableDescriptor]) -> Vec<String> {
    let names: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut suggestions = Vec::new();
    for table in tables {
        for fk in &table.foreign_keys {
            if names.contains(fk.referenced_table.as_str()) {
                suggestions.push(format!(
                    "{} LEFT JOIN {} ON {}.{} = {}.{}",
                    table.name,
                    fk.referenced_table,
                    table.name,
                    fk.column,
                    fk.referenced_table,
                    fk.referenced_column
                ));
            }
        }
    }
    suggestions
}

/// Deterministic MD5 content hash over table, column and type names.
///
/// `BTreeMap` iteration gives a canonical key order, so the same schema always
/// hashes to the same value regardless of load order.
pub fn compute_hash(tables: &BTreeMap<String, TableDescriptor>) -> String {
    let canonical: BTreeMap<&str, BTreeMap<&str, String>> = tables
        .iter()
        .map(|(name, table)| {
            let columns: BTreeMap<&str, String> = table
                .columns
                .iter()
                .map(|c| (c.name.as_str(), c.data_type.to_string()))
                .collect();
            (name.as_str(), columns)
        })
        .collect();
    // Serializing a BTreeMap of strings cannot fail.
    let payload = serde_json::to_string(&canonical).unwrap_or_default();
    format!("{:x}", md5::compute(payload))
}

/// The difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChangeSet {
    pub tables_added: Vec<String>,
    pub tables_removed: Vec<String>,
    pub columns_added: BTreeMap<String, Vec<String>>,
    pub columns_removed: BTreeMap<String, Vec<String>>,
}

impl SchemaChangeSet {
    pub fn is_empty(&self) -> bool {
        self.tables_added.is_empty()
            && self.tables_removed.is_empty()
            && self.columns_added.is_empty()
            && self.columns_removed.is_empty()
    }

    /// One-line summary for trace messages and logs.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no changes".to_string();
        }
        let mut parts = Vec::new();
        if !self.tables_added.is_empty() {
            parts.push(format!("+{} table(s)", self.tables_added.len()));
        }
        if !self.tables_removed.is_empty() {
            parts.push(format!("-{} table(s)", self.tables_removed.len()));
        }
        let added_cols: usize = self.columns_added.values().map(Vec::len).sum();
        if added_cols > 0 {
            parts.push(format!("+{added_cols} column(s)"));
        }
        let removed_cols: usize = self.columns_removed.values().map(Vec::len).sum();
        if removed_cols > 0 {
            parts.push(format!("-{removed_cols} column(s)"));
        }
        parts.join(", ")
    }
}
