//! # Schema Catalog
//!
//! Owns the published [`SchemaSnapshot`] and refreshes it from its source,
//! either a fixed DDL script or live introspection of the storage provider.
//! Refreshes build a complete new snapshot off to the side and swap one
//! `Arc`, so readers never observe a partially loaded schema.

use crate::providers::db::storage::Storage;
use crate::schema::{parse_ddl, SchemaChangeSet, SchemaError, SchemaSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where the catalog loads schema definitions from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// A fixed, annotated DDL script.
    Ddl(String),
    /// Live introspection of the storage provider.
    Live(Arc<dyn Storage>),
}

impl SchemaSource {
    fn label(&self) -> &'static str {
        match self {
            SchemaSource::Ddl(_) => "ddl",
            SchemaSource::Live(_) => "live",
        }
    }
}

/// A point-in-time health summary of the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatus {
    pub source: String,
    pub table_count: usize,
    pub column_count: usize,
    pub schema_hash: String,
    pub loaded_at: DateTime<Utc>,
    pub degraded: bool,
}

/// Loads, publishes and refreshes the schema the rest of the pipeline reads.
#[derive(Debug)]
pub struct SchemaCatalog {
    source: SchemaSource,
    current: RwLock<Arc<SchemaSnapshot>>,
    degraded: AtomicBool,
}

impl SchemaCatalog {
    /// A catalog backed by an annotated DDL script.
    pub fn from_ddl(ddl: impl Into<String>) -> Self {
        Self::new(SchemaSource::Ddl(ddl.into()))
    }

    /// A catalog that introspects the storage provider on every refresh.
    pub fn live(storage: Arc<dyn Storage>) -> Self {
        Self::new(SchemaSource::Live(storage))
    }

    fn new(source: SchemaSource) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(SchemaSnapshot::empty())),
            degraded: AtomicBool::new(false),
        }
    }

    /// Builds a fresh snapshot from the source without publishing it.
    pub async fn load(&self) -> Result<SchemaSnapshot, SchemaError> {
        match &self.source {
            SchemaSource::Ddl(ddl) => Ok(SchemaSnapshot::from_tables(parse_ddl(ddl)?)),
            SchemaSource::Live(storage) => {
                let names = storage
                    .list_tables()
                    .await
                    .map_err(|e| SchemaError::Introspection(e.to_string()))?;
                let mut tables = Vec::with_capacity(names.len());
                for name in names {
                    let table = storage
                        .table_schema(&name)
                        .await
                        .map_err(|e| SchemaError::Introspection(e.to_string()))?;
                    tables.push(table);
                }
                Ok(SchemaSnapshot::from_tables(tables))
            }
        }
    }

    /// Reloads from the source and publishes the result when the content hash
    /// differs. Returns what changed relative to the previous snapshot.
    pub async fn force_refresh(&self) -> Result<SchemaChangeSet, SchemaError> {
        let fresh = self.load().await?;
        self.degraded.store(false, Ordering::Relaxed);

        let mut guard = self.current.write().await;
        if guard.hash() == fresh.hash() {
            debug!("Schema refresh found no changes (hash {}).", fresh.hash());
            return Ok(SchemaChangeSet::default());
        }

        let changes = Self::diff(&guard, &fresh);
        let first_load = guard.is_empty();
        *guard = Arc::new(fresh);
        let published = Arc::clone(&guard);
        drop(guard);

        if first_load {
            info!(
                "Schema loaded: {} tables, {} columns (hash {}).",
                published.len(),
                published.column_count(),
                published.hash()
            );
        } else {
            info!("Schema changed ({}); published a new snapshot.", changes.summary());
        }
        Ok(changes)
    }

    /// Reloads the schema, swallowing source failures.
    ///
    /// On failure the catalog keeps serving the last good snapshot and marks
    /// itself degraded until a later refresh succeeds.
    pub async fn check_for_changes(&self) -> SchemaChangeSet {
        match self.force_refresh().await {
            Ok(changes) => changes,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                warn!("Schema refresh failed, keeping the last good snapshot: {e}");
                SchemaChangeSet::default()
            }
        }
    }

    /// The currently published snapshot. Cheap; clones one `Arc`.
    pub async fn current(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// True when the last refresh attempt failed and the published snapshot
    /// may be stale.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> CatalogStatus {
        let snapshot = self.current().await;
        CatalogStatus {
            source: self.source.label().to_string(),
            table_count: snapshot.len(),
            column_count: snapshot.column_count(),
            schema_hash: snapshot.hash().to_string(),
            loaded_at: snapshot.loaded_at(),
            degraded: self.is_degraded(),
        }
    }

    /// Structural difference between two snapshots.
    pub fn diff(old: &SchemaSnapshot, new: &SchemaSnapshot) -> SchemaChangeSet {
        let mut changes = SchemaChangeSet::default();
        for table in new.tables() {
            match old.table(&table.name) {
                None => changes.tables_added.push(table.name.clone()),
                Some(before) => {
                    let added: Vec<String> = table
                        .columns
                        .iter()
                        .filter(|c| !before.has_column(&c.name))
                        .map(|c| c.name.clone())
                        .collect();
                    if !added.is_empty() {
                        changes.columns_added.insert(table.name.clone(), added);
                    }
                    let removed: Vec<String> = before
                        .columns
                        .iter()
                        .filter(|c| !table.has_column(&c.name))
                        .map(|c| c.name.clone())
                        .collect();
                    if !removed.is_empty() {
                        changes.columns_removed.insert(table.name.clone(), removed);
                    }
                }
            }
        }
        for table in old.tables() {
            if new.table(&table.name).is_none() {
                changes.tables_removed.push(table.name.clone());
            }
        }
        changes
    }
}
