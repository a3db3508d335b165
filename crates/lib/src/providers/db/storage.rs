use crate::errors::PipelineError;
use crate::schema::TableDescriptor;
use crate::types::{Row, SqlParam};
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::fmt::Debug;

/// A trait for interacting with a storage backend.
///
/// This trait defines a common interface for executing parameterized queries
/// and reading schema metadata from different database providers.
#[async_trait]
pub trait Storage: Send + Sync + DynClone + Debug {
    /// Returns the name of the storage provider (e.g., "SQLite").
    fn name(&self) -> &str;

    /// Returns the query language the provider speaks (e.g., "SQL").
    fn language(&self) -> &str;

    /// Executes a parameterized, read-only query and returns the result rows.
    ///
    /// Each `?` placeholder in `sql` is bound to the parameter at the same
    /// position in `params`.
    async fn execute_query(&self, sql: &str, params: &[SqlParam])
        -> Result<Vec<Row>, PipelineError>;

    /// Reads the column and key metadata for one table.
    async fn table_schema(&self, table_name: &str) -> Result<TableDescriptor, PipelineError>;

    /// Lists the user tables present in the database.
    async fn list_tables(&self) -> Result<Vec<String>, PipelineError>;
}

dyn_clone::clone_trait_object!(Storage);
