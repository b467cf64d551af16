use chrono::{DateTime, Utc};

use crate::connector_proto::{
    describe_table_response, Column, DescribeTableResponse, SoftTruncate, Table,
};
use crate::metadata::{self, TableRegistry};
use crate::store::{self, StorageError, Store};

pub fn create_table(
    registry: &mut TableRegistry,
    store: &mut Store,
    schema: &str,
    table: &Table,
) -> Result<(), StorageError> {
    store.with_transaction(|conn| store::create_table(conn, schema, table))?;
    registry.insert(schema, table.clone());
    Ok(())
}

/// Reconcile a table with a requested definition.
///
/// New columns are added; a column whose type differs (base type, DECIMAL
/// precision/scale, or STRING byte length) is converted in place, as is a
/// change to the primary key set. Columns absent from the request are dropped
/// only when `drop_columns` is set, otherwise they are kept and logged. The
/// whole reconciliation is one transaction: on failure the physical table and
/// the registry both keep their pre-call column set.
pub fn alter_table(
    registry: &mut TableRegistry,
    store: &mut Store,
    schema: &str,
    requested: &Table,
    drop_columns: bool,
) -> Result<(), StorageError> {
    let current = registry
        .get(schema, &requested.name)
        .cloned()
        .ok_or_else(|| StorageError::missing_table(schema, &requested.name))?;

    let added: Vec<Column> = requested
        .columns
        .iter()
        .filter(|col| metadata::find_column(&current, &col.name).is_none())
        .cloned()
        .collect();
    let type_changed = requested.columns.iter().any(|col| {
        metadata::find_column(&current, &col.name)
            .is_some_and(|existing| !metadata::types_equal(existing, col))
    });
    let removed: Vec<String> = current
        .columns
        .iter()
        .filter(|col| metadata::find_column(requested, &col.name).is_none())
        .map(|col| col.name.clone())
        .collect();
    let pk_changed = primary_key_names(&current) != primary_key_names(requested);

    // Target definition: the request, plus any kept columns when drops are
    // declined.
    let mut target = requested.clone();
    if !drop_columns {
        for name in &removed {
            if let Some(col) = metadata::find_column(&current, name) {
                target.columns.push(col.clone());
            }
        }
        if !removed.is_empty() {
            tracing::info!(
                schema,
                table = %requested.name,
                kept = ?removed,
                "drop_columns not set, keeping columns absent from the request"
            );
        }
    }

    let needs_rebuild = type_changed || pk_changed || (drop_columns && !removed.is_empty());
    if needs_rebuild {
        let copy: Vec<String> = current
            .columns
            .iter()
            .filter(|col| metadata::find_column(&target, &col.name).is_some())
            .map(|col| col.name.clone())
            .collect();
        store.with_transaction(|conn| store::rebuild_table(conn, schema, &target, &copy))?;
        tracing::info!(schema, table = %requested.name, "table rebuilt to new definition");
    } else if !added.is_empty() {
        store.with_transaction(|conn| {
            for col in &added {
                store::add_column(conn, schema, &requested.name, col)?;
            }
            Ok(())
        })?;
        tracing::info!(schema, table = %requested.name, added = added.len(), "columns added");
    }

    registry.insert(schema, target);
    Ok(())
}

fn primary_key_names(table: &Table) -> Vec<&str> {
    let mut names: Vec<&str> = table
        .columns
        .iter()
        .filter(|col| col.primary_key)
        .map(|col| col.name.as_str())
        .collect();
    names.sort_unstable();
    names
}

/// Hard truncate removes all rows; soft truncate flags them deleted instead,
/// optionally only rows synced before the given cutoff.
pub fn truncate(
    store: &mut Store,
    schema: &str,
    table: &str,
    soft: Option<&SoftTruncate>,
) -> Result<(), StorageError> {
    match soft {
        None => {
            store::truncate_table(store.conn(), schema, table)?;
            tracing::info!(schema, table, "table truncated");
        }
        Some(soft) => {
            let cutoff = match (soft.synced_column.as_deref(), soft.utc_delete_before.as_deref())
            {
                (Some(column), Some(raw)) => Some((column, parse_utc(raw)?)),
                _ => None,
            };
            store::soft_truncate(store.conn(), schema, table, &soft.deleted_column, cutoff)?;
            tracing::info!(
                schema,
                table,
                deleted_column = %soft.deleted_column,
                bounded = cutoff.is_some(),
                "table soft truncated"
            );
        }
    }
    Ok(())
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp {
            value: raw.to_string(),
        })
}

/// The registry is the authoritative metadata; the physical store is not
/// consulted here.
pub fn describe_table(
    registry: &TableRegistry,
    schema: &str,
    table: &str,
) -> DescribeTableResponse {
    let response = match registry.get(schema, table) {
        Some(def) => describe_table_response::Response::Table(def.clone()),
        None => describe_table_response::Response::NotFound(true),
    };
    DescribeTableResponse {
        response: Some(response),
    }
}
