use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tonic::{Request, Response, Status};

use crate::connector_proto::{
    destination_connector_server::DestinationConnector, test_response, AlterTableRequest,
    AlterTableResponse, ConfigurationFormRequest, ConfigurationFormResponse, CreateTableRequest,
    CreateTableResponse, DescribeTableRequest, DescribeTableResponse, MigrateRequest,
    MigrateResponse, TestRequest, TestResponse, TruncateRequest, TruncateResponse,
    WriteBatchRequest, WriteBatchResponse, WriteHistoryBatchRequest,
};
use crate::forms;
use crate::metadata::TableRegistry;
use crate::migration::{MigrateOutcome, MigrationDispatcher};
use crate::store::Store;
use crate::table_ops;

/// Shared mutable state of the destination connector. One mutex covers both
/// the registry and the store so every DDL or migration operation observes
/// and produces a consistent pair.
pub struct DestinationState {
    pub registry: TableRegistry,
    pub store: Store,
}

#[derive(Clone)]
pub struct DestinationService {
    state: Arc<Mutex<DestinationState>>,
}

impl DestinationService {
    pub fn new(registry: TableRegistry, store: Store) -> Self {
        Self::shared(Arc::new(Mutex::new(DestinationState { registry, store })))
    }

    pub fn shared(state: Arc<Mutex<DestinationState>>) -> Self {
        Self { state }
    }

    fn lock(&self) -> MutexGuard<'_, DestinationState> {
        // A poisoned lock only means a test thread panicked mid-operation;
        // the state itself is transactional.
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn log_batch_files(stage: &str, files: &[String], keys: &HashMap<String, Vec<u8>>) {
    for file in files {
        let key_bytes = keys.get(file).map_or(0, |key| key.len());
        tracing::info!(stage, file = %file, key_bytes, "batch file received");
    }
}

#[tonic::async_trait]
impl DestinationConnector for DestinationService {
    async fn configuration_form(
        &self,
        _request: Request<ConfigurationFormRequest>,
    ) -> Result<Response<ConfigurationFormResponse>, Status> {
        tracing::info!("fetching destination configuration form");
        Ok(Response::new(forms::destination_configuration_form()))
    }

    async fn test(
        &self,
        request: Request<TestRequest>,
    ) -> Result<Response<TestResponse>, Status> {
        let name = request.into_inner().name;
        tracing::info!(test = %name, "running configuration test");
        Ok(Response::new(TestResponse {
            response: Some(test_response::Response::Success(true)),
        }))
    }

    async fn create_table(
        &self,
        request: Request<CreateTableRequest>,
    ) -> Result<Response<CreateTableResponse>, Status> {
        let request = request.into_inner();
        let table = request
            .table
            .ok_or_else(|| Status::invalid_argument("table definition is required"))?;
        let mut state = self.lock();
        let state = &mut *state;
        let success = match table_ops::create_table(
            &mut state.registry,
            &mut state.store,
            &request.schema_name,
            &table,
        ) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(schema = %request.schema_name, table = %table.name, error = %err, "create table failed");
                false
            }
        };
        Ok(Response::new(CreateTableResponse { success }))
    }

    async fn alter_table(
        &self,
        request: Request<AlterTableRequest>,
    ) -> Result<Response<AlterTableResponse>, Status> {
        let request = request.into_inner();
        let table = request
            .table
            .ok_or_else(|| Status::invalid_argument("table definition is required"))?;
        let mut state = self.lock();
        let state = &mut *state;
        let success = match table_ops::alter_table(
            &mut state.registry,
            &mut state.store,
            &request.schema_name,
            &table,
            request.drop_columns,
        ) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(schema = %request.schema_name, table = %table.name, error = %err, "alter table failed");
                false
            }
        };
        Ok(Response::new(AlterTableResponse { success }))
    }

    async fn truncate(
        &self,
        request: Request<TruncateRequest>,
    ) -> Result<Response<TruncateResponse>, Status> {
        let request = request.into_inner();
        let mut state = self.lock();
        let success = match table_ops::truncate(
            &mut state.store,
            &request.schema_name,
            &request.table_name,
            request.soft.as_ref(),
        ) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(schema = %request.schema_name, table = %request.table_name, error = %err, "truncate failed");
                false
            }
        };
        Ok(Response::new(TruncateResponse { success }))
    }

    async fn describe_table(
        &self,
        request: Request<DescribeTableRequest>,
    ) -> Result<Response<DescribeTableResponse>, Status> {
        let request = request.into_inner();
        let state = self.lock();
        Ok(Response::new(table_ops::describe_table(
            &state.registry,
            &request.schema_name,
            &request.table_name,
        )))
    }

    async fn write_batch(
        &self,
        request: Request<WriteBatchRequest>,
    ) -> Result<Response<WriteBatchResponse>, Status> {
        let request = request.into_inner();
        let table = request.table.map(|t| t.name).unwrap_or_default();
        tracing::info!(schema = %request.schema_name, table = %table, "write batch");
        log_batch_files("replace", &request.replace_files, &request.keys);
        log_batch_files("update", &request.update_files, &request.keys);
        log_batch_files("delete", &request.delete_files, &request.keys);
        Ok(Response::new(WriteBatchResponse { success: true }))
    }

    async fn write_history_batch(
        &self,
        request: Request<WriteHistoryBatchRequest>,
    ) -> Result<Response<WriteBatchResponse>, Status> {
        let request = request.into_inner();
        let table = request.table.map(|t| t.name).unwrap_or_default();
        tracing::info!(schema = %request.schema_name, table = %table, "write history batch");
        // Earliest-start files first: they establish the history window the
        // later stages modify.
        log_batch_files("earliest_start", &request.earliest_start_files, &request.keys);
        log_batch_files("replace", &request.replace_files, &request.keys);
        log_batch_files("update", &request.update_files, &request.keys);
        log_batch_files("delete", &request.delete_files, &request.keys);
        Ok(Response::new(WriteBatchResponse { success: true }))
    }

    async fn migrate(
        &self,
        request: Request<MigrateRequest>,
    ) -> Result<Response<MigrateResponse>, Status> {
        let request = request.into_inner();
        let outcome = match request.details {
            Some(details) => {
                let mut state = self.lock();
                let state = &mut *state;
                MigrationDispatcher::new(&mut state.registry, &mut state.store).apply(&details)
            }
            None => {
                tracing::warn!("migrate request without details");
                MigrateOutcome::Unsupported
            }
        };
        Ok(Response::new(outcome.into_response()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector_proto::{
        describe_table_response, migrate_response, migration_details::Operation, Column, DataType,
        DropOperation, DropTable, MigrationDetails, SoftTruncate, Table,
    };
    use crate::metadata::plain_column;

    fn service() -> DestinationService {
        DestinationService::new(TableRegistry::new(), Store::open_in_memory().unwrap())
    }

    fn orders() -> Table {
        Table {
            name: "orders".to_string(),
            columns: vec![
                Column {
                    primary_key: true,
                    ..plain_column("id", DataType::Long)
                },
                plain_column("note", DataType::String),
            ],
        }
    }

    fn create_request(table: Table) -> CreateTableRequest {
        CreateTableRequest {
            configuration: HashMap::new(),
            schema_name: "shop".to_string(),
            table: Some(table),
        }
    }

    #[tokio::test]
    async fn create_then_describe_round_trips() {
        let service = service();
        let created = service
            .create_table(Request::new(create_request(orders())))
            .await
            .unwrap();
        assert!(created.into_inner().success);

        let described = service
            .describe_table(Request::new(DescribeTableRequest {
                configuration: HashMap::new(),
                schema_name: "shop".to_string(),
                table_name: "orders".to_string(),
            }))
            .await
            .unwrap();
        match described.into_inner().response {
            Some(describe_table_response::Response::Table(table)) => {
                assert_eq!(table.columns.len(), 2);
            }
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_create_reports_soft_failure() {
        let service = service();
        assert!(service
            .create_table(Request::new(create_request(orders())))
            .await
            .unwrap()
            .into_inner()
            .success);
        // Same table again: the store rejects it, the RPC stays healthy.
        assert!(!service
            .create_table(Request::new(create_request(orders())))
            .await
            .unwrap()
            .into_inner()
            .success);
    }

    #[tokio::test]
    async fn soft_truncate_flags_all_rows() {
        let service = service();
        let mut table = orders();
        table.columns.push(plain_column("_deleted", DataType::Boolean));
        service
            .create_table(Request::new(create_request(table)))
            .await
            .unwrap();
        {
            let state = service.lock();
            state
                .store
                .conn()
                .execute(
                    "INSERT INTO \"shop.orders\" (id, note, \"_deleted\") VALUES (1, 'a', 0)",
                    [],
                )
                .unwrap();
        }

        let response = service
            .truncate(Request::new(TruncateRequest {
                configuration: HashMap::new(),
                schema_name: "shop".to_string(),
                table_name: "orders".to_string(),
                soft: Some(SoftTruncate {
                    deleted_column: "_deleted".to_string(),
                    synced_column: None,
                    utc_delete_before: None,
                }),
            }))
            .await
            .unwrap();
        assert!(response.into_inner().success);

        let state = service.lock();
        let flagged: i64 = state
            .store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM \"shop.orders\" WHERE \"_deleted\" = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 1);
    }

    #[tokio::test]
    async fn migrate_drop_table_is_idempotent_success() {
        let service = service();
        let request = || {
            Request::new(MigrateRequest {
                configuration: HashMap::new(),
                details: Some(MigrationDetails {
                    schema: "shop".to_string(),
                    table: "ghost".to_string(),
                    operation: Some(Operation::Drop(DropOperation {
                        entity: Some(
                            crate::connector_proto::drop_operation::Entity::DropTable(DropTable {}),
                        ),
                    })),
                }),
            })
        };
        for _ in 0..2 {
            let response = service.migrate(request()).await.unwrap();
            assert!(matches!(
                response.into_inner().response,
                Some(migrate_response::Response::Success(true))
            ));
        }
    }
}
