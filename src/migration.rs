use crate::connector_proto::{
    add_operation, copy_operation, drop_operation, migrate_response::Response,
    migration_details::Operation, rename_operation, AddOperation, Column, CopyOperation, DataType,
    DropOperation, MigrateResponse, MigrationDetails, RenameOperation, Table,
    TableSyncModeMigrationOperation, TableSyncModeMigrationType, Task,
    UpdateColumnValueOperation, Warning,
};
use crate::metadata::{self, TableRegistry};
use crate::store::{self, StorageError, Store};

/// Outcome of one migration operation, mapped onto the response oneof.
/// `Failed` is the caught-storage-error arm; it reports `{success: false}`
/// rather than a transport fault so the caller can retry or skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    Success,
    Failed,
    Unsupported,
    Warning(String),
    Task(String),
}

impl MigrateOutcome {
    pub fn into_response(self) -> MigrateResponse {
        let response = match self {
            Self::Success => Response::Success(true),
            Self::Failed => Response::Success(false),
            Self::Unsupported => Response::Unsupported(true),
            Self::Warning(message) => Response::Warning(Warning { message }),
            Self::Task(message) => Response::Task(Task { message }),
        };
        MigrateResponse {
            response: Some(response),
        }
    }
}

/// Applies migration operations against the shared registry and store. The
/// registry is only updated after the physical change commits, so a failed
/// operation leaves both views consistent.
pub struct MigrationDispatcher<'a> {
    registry: &'a mut TableRegistry,
    store: &'a mut Store,
}

impl<'a> MigrationDispatcher<'a> {
    pub fn new(registry: &'a mut TableRegistry, store: &'a mut Store) -> Self {
        Self { registry, store }
    }

    pub fn apply(&mut self, details: &MigrationDetails) -> MigrateOutcome {
        let schema = details.schema.as_str();
        let table = details.table.as_str();
        let result = match details.operation.as_ref() {
            Some(Operation::Drop(op)) => self.apply_drop(schema, table, op),
            Some(Operation::Copy(op)) => self.apply_copy(schema, table, op),
            Some(Operation::Rename(op)) => self.apply_rename(schema, table, op),
            Some(Operation::Add(op)) => self.apply_add(schema, table, op),
            Some(Operation::UpdateColumnValue(op)) => {
                self.apply_update_column_value(schema, table, op)
            }
            Some(Operation::TableSyncModeMigration(op)) => {
                self.apply_sync_mode_migration(schema, table, op)
            }
            None => {
                tracing::warn!(schema, table, "migration request without an operation");
                Ok(MigrateOutcome::Unsupported)
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(schema, table, error = %err, "migration failed");
                MigrateOutcome::Failed
            }
        }
    }

    fn apply_drop(
        &mut self,
        schema: &str,
        table: &str,
        op: &DropOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        match op.entity.as_ref() {
            Some(drop_operation::Entity::DropTable(_)) => {
                store::drop_table(self.store.conn(), schema, table)?;
                self.registry.remove(schema, table);
                tracing::info!(schema, table, "table dropped");
                Ok(MigrateOutcome::Success)
            }
            Some(drop_operation::Entity::DropColumnInHistoryMode(drop)) => {
                // History mode preserves the full record of past values, so
                // the column stays in place; the drop is acknowledged only.
                tracing::info!(
                    schema,
                    table,
                    column = %drop.column,
                    operation_timestamp = %drop.operation_timestamp,
                    "column drop in history mode recorded, column retained"
                );
                Ok(MigrateOutcome::Success)
            }
            None => Ok(MigrateOutcome::Unsupported),
        }
    }

    fn apply_copy(
        &mut self,
        schema: &str,
        table: &str,
        op: &CopyOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        match op.entity.as_ref() {
            Some(copy_operation::Entity::CopyTable(copy)) => {
                let source = self
                    .registry
                    .get(schema, &copy.from_table)
                    .cloned()
                    .ok_or_else(|| StorageError::missing_table(schema, &copy.from_table))?;
                let target = metadata::table_copy(&source, &copy.to_table);
                let columns: Vec<String> =
                    target.columns.iter().map(|col| col.name.clone()).collect();
                self.store.with_transaction(|conn| {
                    store::create_table(conn, schema, &target)?;
                    store::copy_table_rows(conn, schema, &copy.from_table, &copy.to_table, &columns)
                })?;
                self.registry.insert(schema, target);
                tracing::info!(schema, from = %copy.from_table, to = %copy.to_table, "table copied");
                Ok(MigrateOutcome::Success)
            }
            Some(copy_operation::Entity::CopyColumn(copy)) => {
                let mut def = self
                    .registry
                    .get(schema, table)
                    .cloned()
                    .ok_or_else(|| StorageError::missing_table(schema, table))?;
                let source = metadata::find_column(&def, &copy.from_column)
                    .ok_or_else(|| {
                        StorageError::missing_column(schema, table, &copy.from_column)
                    })?;
                let new_column = Column {
                    name: copy.to_column.clone(),
                    primary_key: false,
                    ..source.clone()
                };
                self.store.with_transaction(|conn| {
                    store::add_column(conn, schema, table, &new_column)?;
                    store::copy_column_values(
                        conn,
                        schema,
                        table,
                        &copy.from_column,
                        &copy.to_column,
                    )
                })?;
                def.columns.push(new_column);
                self.registry.insert(schema, def);
                tracing::info!(schema, table, from = %copy.from_column, to = %copy.to_column, "column copied");
                Ok(MigrateOutcome::Success)
            }
            Some(copy_operation::Entity::CopyTableToHistoryMode(copy)) => {
                let source = self
                    .registry
                    .get(schema, &copy.from_table)
                    .cloned()
                    .ok_or_else(|| StorageError::missing_table(schema, &copy.from_table))?;
                let mut target = metadata::table_copy(&source, &copy.to_table);
                metadata::remove_column(&mut target, &copy.soft_deleted_column);
                metadata::add_history_columns(&mut target);
                // Data travels without the system triple; history bookkeeping
                // starts fresh in the new table.
                let columns: Vec<String> = target
                    .columns
                    .iter()
                    .filter(|col| {
                        ![
                            metadata::HISTORY_START,
                            metadata::HISTORY_END,
                            metadata::HISTORY_ACTIVE,
                        ]
                        .contains(&col.name.as_str())
                    })
                    .map(|col| col.name.clone())
                    .collect();
                self.store.with_transaction(|conn| {
                    store::create_table(conn, schema, &target)?;
                    store::copy_table_rows(conn, schema, &copy.from_table, &copy.to_table, &columns)
                })?;
                self.registry.insert(schema, target);
                tracing::info!(
                    schema,
                    from = %copy.from_table,
                    to = %copy.to_table,
                    soft_deleted_column = %copy.soft_deleted_column,
                    "table copied into history mode"
                );
                Ok(MigrateOutcome::Success)
            }
            None => Ok(MigrateOutcome::Unsupported),
        }
    }

    fn apply_rename(
        &mut self,
        schema: &str,
        table: &str,
        op: &RenameOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        match op.entity.as_ref() {
            Some(rename_operation::Entity::RenameTable(rename)) => {
                if !self.registry.contains(schema, &rename.from_table) {
                    return Err(StorageError::missing_table(schema, &rename.from_table));
                }
                store::rename_table(
                    self.store.conn(),
                    schema,
                    &rename.from_table,
                    &rename.to_table,
                )?;
                self.registry
                    .rename(schema, &rename.from_table, &rename.to_table);
                tracing::info!(schema, from = %rename.from_table, to = %rename.to_table, "table renamed");
                Ok(MigrateOutcome::Success)
            }
            Some(rename_operation::Entity::RenameColumn(rename)) => {
                let mut def = self
                    .registry
                    .get(schema, table)
                    .cloned()
                    .ok_or_else(|| StorageError::missing_table(schema, table))?;
                let column = def
                    .columns
                    .iter_mut()
                    .find(|col| col.name == rename.from_column)
                    .ok_or_else(|| {
                        StorageError::missing_column(schema, table, &rename.from_column)
                    })?;
                store::rename_column(
                    self.store.conn(),
                    schema,
                    table,
                    &rename.from_column,
                    &rename.to_column,
                )?;
                column.name = rename.to_column.clone();
                self.registry.insert(schema, def);
                tracing::info!(schema, table, from = %rename.from_column, to = %rename.to_column, "column renamed");
                Ok(MigrateOutcome::Success)
            }
            None => Ok(MigrateOutcome::Unsupported),
        }
    }

    fn apply_add(
        &mut self,
        schema: &str,
        table: &str,
        op: &AddOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        match op.entity.as_ref() {
            Some(add_operation::Entity::AddColumnInHistoryMode(add)) => {
                tracing::info!(
                    schema,
                    table,
                    column = %add.column,
                    operation_timestamp = %add.operation_timestamp,
                    "adding column in history mode"
                );
                self.add_with_default(schema, table, &add.column, add.column_type(), add.default_value.as_deref())
            }
            Some(add_operation::Entity::AddColumnWithDefaultValue(add)) => self.add_with_default(
                schema,
                table,
                &add.column,
                add.column_type(),
                add.default_value.as_deref(),
            ),
            None => Ok(MigrateOutcome::Unsupported),
        }
    }

    fn add_with_default(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
        column_type: DataType,
        default_value: Option<&str>,
    ) -> Result<MigrateOutcome, StorageError> {
        let mut def = self
            .registry
            .get(schema, table)
            .cloned()
            .ok_or_else(|| StorageError::missing_table(schema, table))?;
        let new_column = metadata::plain_column(column, column_type);
        self.store.with_transaction(|conn| {
            store::add_column(conn, schema, table, &new_column)?;
            if let Some(value) = default_value {
                store::update_column_value(conn, schema, table, column, value)?;
            }
            Ok(())
        })?;
        def.columns.push(new_column);
        self.registry.insert(schema, def);
        tracing::info!(schema, table, column, ?default_value, "column added");
        Ok(MigrateOutcome::Success)
    }

    fn apply_update_column_value(
        &mut self,
        schema: &str,
        table: &str,
        op: &UpdateColumnValueOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        let def = self
            .registry
            .get(schema, table)
            .ok_or_else(|| StorageError::missing_table(schema, table))?;
        if metadata::find_column(def, &op.column).is_none() {
            return Err(StorageError::missing_column(schema, table, &op.column));
        }
        store::update_column_value(self.store.conn(), schema, table, &op.column, &op.value)?;
        tracing::info!(schema, table, column = %op.column, "column value updated");
        Ok(MigrateOutcome::Success)
    }

    fn apply_sync_mode_migration(
        &mut self,
        schema: &str,
        table: &str,
        op: &TableSyncModeMigrationOperation,
    ) -> Result<MigrateOutcome, StorageError> {
        let Ok(migration) = TableSyncModeMigrationType::try_from(op.r#type) else {
            tracing::warn!(schema, table, raw = op.r#type, "unknown sync mode migration type");
            return Ok(MigrateOutcome::Unsupported);
        };
        let mut def = self
            .registry
            .get(schema, table)
            .cloned()
            .ok_or_else(|| StorageError::missing_table(schema, table))?;
        let flag = op
            .soft_deleted_column
            .as_deref()
            .filter(|name| !name.is_empty());
        let mode_before = metadata::table_mode(&def, flag);

        match migration {
            TableSyncModeMigrationType::SoftDeleteToLive => {
                let purge = !op.keep_deleted_rows.unwrap_or(true);
                if let Some(flag) = flag {
                    if metadata::find_column(&def, flag).is_some() {
                        self.store.with_transaction(|conn| {
                            if purge {
                                let purged =
                                    store::delete_flagged_rows(conn, schema, table, flag)?;
                                tracing::info!(schema, table, purged, "deleted rows purged");
                            }
                            store::drop_column(conn, schema, table, flag)
                        })?;
                        metadata::remove_column(&mut def, flag);
                    }
                }
            }
            TableSyncModeMigrationType::SoftDeleteToHistory => {
                let history = self.missing_history_columns(&def);
                let drop_flag =
                    flag.filter(|name| metadata::find_column(&def, name).is_some());
                self.store.with_transaction(|conn| {
                    if let Some(flag) = drop_flag {
                        store::drop_column(conn, schema, table, flag)?;
                    }
                    for col in &history {
                        store::add_column(conn, schema, table, col)?;
                    }
                    Ok(())
                })?;
                if let Some(flag) = drop_flag {
                    metadata::remove_column(&mut def, flag);
                }
                metadata::add_history_columns(&mut def);
            }
            TableSyncModeMigrationType::HistoryToSoftDelete => {
                let present = self.present_history_columns(&def);
                let add_flag =
                    flag.filter(|name| metadata::find_column(&def, name).is_none());
                self.store.with_transaction(|conn| {
                    for name in &present {
                        store::drop_column(conn, schema, table, name)?;
                    }
                    if let Some(flag) = add_flag {
                        store::add_column(
                            conn,
                            schema,
                            table,
                            &metadata::plain_column(flag, DataType::Boolean),
                        )?;
                    }
                    Ok(())
                })?;
                metadata::remove_history_columns(&mut def);
                if let Some(flag) = add_flag {
                    metadata::add_soft_delete_column(&mut def, flag);
                }
            }
            TableSyncModeMigrationType::HistoryToLive => {
                let present = self.present_history_columns(&def);
                self.store.with_transaction(|conn| {
                    for name in &present {
                        store::drop_column(conn, schema, table, name)?;
                    }
                    Ok(())
                })?;
                metadata::remove_history_columns(&mut def);
            }
            TableSyncModeMigrationType::LiveToSoftDelete => {
                if let Some(flag) = flag {
                    if metadata::find_column(&def, flag).is_none() {
                        store::add_column(
                            self.store.conn(),
                            schema,
                            table,
                            &metadata::plain_column(flag, DataType::Boolean),
                        )?;
                        metadata::add_soft_delete_column(&mut def, flag);
                    }
                }
            }
            TableSyncModeMigrationType::LiveToHistory => {
                let history = self.missing_history_columns(&def);
                self.store.with_transaction(|conn| {
                    for col in &history {
                        store::add_column(conn, schema, table, col)?;
                    }
                    Ok(())
                })?;
                metadata::add_history_columns(&mut def);
            }
        }
        self.registry.insert(schema, def);
        tracing::info!(schema, table, ?mode_before, ?migration, "sync mode migration applied");
        Ok(MigrateOutcome::Success)
    }

    fn missing_history_columns(&self, def: &Table) -> Vec<Column> {
        metadata::history_columns()
            .into_iter()
            .filter(|col| metadata::find_column(def, &col.name).is_none())
            .collect()
    }

    fn present_history_columns(&self, def: &Table) -> Vec<String> {
        [
            metadata::HISTORY_START,
            metadata::HISTORY_END,
            metadata::HISTORY_ACTIVE,
        ]
        .iter()
        .filter(|name| metadata::find_column(def, name).is_some())
        .map(|name| name.to_string())
        .collect()
    }
}
