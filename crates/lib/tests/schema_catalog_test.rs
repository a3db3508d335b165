//! Tests for the schema catalog: loading, drift detection and degraded mode.

mod common;

use carerag::schema::{ColumnDescriptor, ColumnType, SchemaCatalog, SchemaSnapshot};
use common::{clinic_tables, setup_tracing, ScriptedStorage, CLINIC_DDL};
use std::sync::Arc;

#[tokio::test]
async fn test_ddl_catalog_first_load() {
    setup_tracing();

    // 1. A catalog backed by the annotated script.
    let catalog = SchemaCatalog::from_ddl(CLINIC_DDL);
    assert!(catalog.current().await.is_empty());

    // 2. The first refresh publishes every table as an addition.
    let changes = catalog.force_refresh().await.expect("refresh should succeed");
    assert_eq!(changes.tables_added.len(), 5);
    assert!(changes.columns_added.is_empty());

    // 3. The published snapshot and status reflect the load.
    let snapshot = catalog.current().await;
    assert_eq!(snapshot.len(), 5);
    assert!(snapshot.table("Appointment").is_some());
    let status = catalog.status().await;
    assert_eq!(status.source, "ddl");
    assert_eq!(status.table_count, 5);
    assert!(!status.degraded);
}

#[tokio::test]
async fn test_unchanged_schema_keeps_the_snapshot() {
    setup_tracing();
    let catalog = SchemaCatalog::from_ddl(CLINIC_DDL);
    catalog.force_refresh().await.expect("first refresh");
    let before = catalog.current().await;

    // A refresh that finds the same content hash publishes nothing.
    let changes = catalog.check_for_changes().await;
    assert!(changes.is_empty());
    let after = catalog.current().await;
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_live_catalog_detects_new_column() {
    setup_tracing();

    // 1. A live catalog introspecting the scripted storage.
    let storage = ScriptedStorage::new(vec![]);
    let catalog = SchemaCatalog::live(Arc::new(storage.clone()));
    let first = catalog.force_refresh().await.expect("first load");
    assert_eq!(first.tables_added.len(), 5);
    let old_hash = catalog.current().await.hash().to_string();

    // 2. A migration adds a column to Patient between refreshes.
    let mut tables = clinic_tables();
    let patient = tables
        .iter_mut()
        .find(|t| t.name == "Patient")
        .expect("Patient table");
    patient.columns.push(ColumnDescriptor::new(
        "PreferredName",
        ColumnType::Text { length: Some(100) },
    ));
    storage.set_tables(tables);

    // 3. The next check reports exactly that column.
    let changes = catalog.check_for_changes().await;
    assert_eq!(
        changes.columns_added.get("Patient"),
        Some(&vec!["PreferredName".to_string()])
    );
    assert!(changes.tables_added.is_empty());
    assert_ne!(catalog.current().await.hash(), old_hash);
}

#[tokio::test]
async fn test_introspection_failure_keeps_last_good_snapshot() {
    setup_tracing();
    let storage = ScriptedStorage::new(vec![]);
    let catalog = SchemaCatalog::live(Arc::new(storage.clone()));
    catalog.force_refresh().await.expect("first load");

    // 1. The connection drops; the catalog degrades but keeps serving.
    storage.fail_introspection(true);
    let changes = catalog.check_for_changes().await;
    assert!(changes.is_empty());
    assert!(catalog.is_degraded());
    assert_eq!(catalog.current().await.len(), 5);
    assert!(catalog.status().await.degraded);

    // 2. The connection comes back; the next refresh clears the flag.
    storage.fail_introspection(false);
    catalog.check_for_changes().await;
    assert!(!catalog.is_degraded());
}

#[tokio::test]
async fn test_diff_reports_removed_tables() {
    setup_tracing();
    let old = SchemaSnapshot::from_tables(clinic_tables());
    let trimmed: Vec<_> = clinic_tables()
        .into_iter()
        .filter(|t| t.name != "AppointmentStatus")
        .collect();
    let new = SchemaSnapshot::from_tables(trimmed);

    let changes = SchemaCatalog::diff(&old, &new);
    assert_eq!(changes.tables_removed, vec!["AppointmentStatus".to_string()]);
    assert!(changes.tables_added.is_empty());
}
