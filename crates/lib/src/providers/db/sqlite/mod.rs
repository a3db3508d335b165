use crate::errors::PipelineError;
use crate::providers::db::storage::Storage;
use crate::schema::parser::parse_column_type;
use crate::schema::{ColumnDescriptor, ForeignKeyRef, TableDescriptor};
use crate::types::{Row, SqlParam};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::{self, Debug};
use tracing::{debug, info};
use turso::{Database, Value as TursoValue};

/// A provider for interacting with a local SQLite database using Turso.
///
/// This provider holds a `Database` instance, which manages a connection pool.
/// When cloned, it shares the same underlying database, allowing for
/// concurrent and shared access to the same database file or in-memory
/// instance.
#[derive(Clone)]
pub struct SqliteProvider {
    /// The Turso database instance. It's cloneable and thread-safe.
    pub db: Database,
}

impl SqliteProvider {
    /// Creates a new `SqliteProvider` from a file path or in-memory.
    ///
    /// # Arguments
    ///
    /// * `db_path`: The path to the SQLite database file. Use ":memory:" for a
    ///   unique, isolated in-memory database. To share an in-memory database
    ///   across multiple `SqliteProvider` instances (e.g., in tests), create
    ///   one provider and then `.clone()` it.
    pub async fn new(db_path: &str) -> Result<Self, PipelineError> {
        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        // Enable WAL mode for better concurrency. This has no effect on
        // in-memory databases but is safe to run.
        let conn = db
            .connect()
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;
        // Use `query` for PRAGMA statements that return a value to avoid "unexpected row" errors.
        conn.query("PRAGMA journal_mode=WAL;", ())
            .await
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        Ok(Self { db })
    }

    /// A helper for tests to pre-populate data by executing multiple SQL statements.
    pub async fn initialize_with_data(&self, init_sql: &str) -> Result<(), PipelineError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        for statement in init_sql.split(';').filter(|s| !s.trim().is_empty()) {
            conn.execute(statement, ())
                .await
                .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteProvider").finish_non_exhaustive()
    }
}

/// Converts a Turso value to a serde_json::Value.
fn turso_value_to_json(v: TursoValue) -> Value {
    match v {
        TursoValue::Null => Value::Null,
        TursoValue::Integer(i) => Value::Number(i.into()),
        TursoValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TursoValue::Text(s) => Value::String(s),
        TursoValue::Blob(_) => Value::String("<blob>".to_string()),
    }
}

/// Converts bound parameters to Turso values, positionally.
fn to_turso_params(params: &[SqlParam]) -> Vec<TursoValue> {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Integer(i) => TursoValue::Integer(*i),
            SqlParam::Real(f) => TursoValue::Real(*f),
            SqlParam::Text(s) => TursoValue::Text(s.clone()),
        })
        .collect()
}

#[async_trait]
impl Storage for SqliteProvider {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn language(&self) -> &str {
        "SQL"
    }

    /// Executes a parameterized query and returns the result rows.
    async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, PipelineError> {
        debug!(sql = %sql, params = ?params, "--> Executing SQLite query");

        // Get a new connection for this query.
        let conn = self
            .db
            .connect()
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;

        let column_names: Vec<String> = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut rows = stmt
            .query(to_turso_params(params))
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;

        let mut results: Vec<Row> = Vec::new();

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?
        {
            let mut row_map = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = row
                    .get_value(i)
                    .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;
                row_map.insert(name.clone(), turso_value_to_json(value));
            }
            results.push(row_map);
        }

        Ok(results)
    }

    /// Reads one table's columns and keys via PRAGMA introspection.
    async fn table_schema(&self, table_name: &str) -> Result<TableDescriptor, PipelineError> {
        debug!(table_name = %table_name, "Introspecting table schema.");

        let conn = self
            .db
            .connect()
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        let mut table = TableDescriptor::new(table_name, "");

        let query = format!("PRAGMA table_info({table_name});");
        let mut rows = conn
            .query(&query, ())
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?
        {
            // PRAGMA table_info columns: cid, name, type, notnull, dflt_value, pk
            if let (Ok(TursoValue::Text(name)), Ok(TursoValue::Text(type_str))) =
                (row.get_value(1), row.get_value(2))
            {
                let mut column = ColumnDescriptor::new(name.clone(), parse_column_type(&type_str));
                if let Ok(TursoValue::Integer(notnull)) = row.get_value(3) {
                    column.nullable = notnull == 0;
                }
                if let Ok(TursoValue::Text(default)) = row.get_value(4) {
                    column.default_value = Some(default);
                }
                if let Ok(TursoValue::Integer(pk)) = row.get_value(5) {
                    if pk > 0 {
                        column.is_primary_key = true;
                        table.primary_keys.insert(name);
                    }
                }
                table.columns.push(column);
            }
        }

        if table.columns.is_empty() {
            return Err(PipelineError::StorageOperationFailed(format!(
                "Table '{table_name}' not found or has no columns."
            )));
        }

        // PRAGMA foreign_key_list columns: id, seq, table, from, to, on_update, on_delete, match
        // A driver without this pragma just yields a table with no foreign keys.
        let query = format!("PRAGMA foreign_key_list({table_name});");
        match conn.query(&query, ()).await {
            Ok(mut rows) => {
                while let Some(row) = rows
                    .next()
                    .await
                    .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?
                {
                    if let (Ok(TursoValue::Text(referenced_table)), Ok(TursoValue::Text(from))) =
                        (row.get_value(2), row.get_value(3))
                    {
                        // The target column is absent when the foreign key
                        // references the other table's primary key implicitly.
                        let referenced_column = match row.get_value(4) {
                            Ok(TursoValue::Text(to)) => to,
                            _ => from.clone(),
                        };
                        if let Some(column) = table.columns.iter_mut().find(|c| c.name == from) {
                            column.is_foreign_key = true;
                        }
                        table.foreign_keys.push(ForeignKeyRef {
                            column: from,
                            referenced_table,
                            referenced_column,
                        });
                    }
                }
            }
            Err(e) => {
                debug!("Foreign key introspection unavailable for `{table_name}`: {e}");
            }
        }

        info!(
            table_name = %table_name,
            "Introspected {} columns and {} foreign keys.",
            table.columns.len(),
            table.foreign_keys.len()
        );

        Ok(table)
    }

    async fn list_tables(&self) -> Result<Vec<String>, PipelineError> {
        debug!("Listing all tables in SQLite database.");
        let conn = self
            .db
            .connect()
            .map_err(|e| PipelineError::StorageConnection(e.to_string()))?;

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name;",
                (),
            )
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?;

        let mut tables = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::StorageOperationFailed(e.to_string()))?
        {
            if let Ok(TursoValue::Text(name)) = row.get_value(0) {
                tables.push(name);
            }
        }
        Ok(tables)
    }
}
