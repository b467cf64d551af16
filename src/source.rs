use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::batch::BatchAccumulator;
use crate::connector_proto::{
    source_connector_server::SourceConnector, test_response, update_response,
    Checkpoint, ConfigurationFormRequest, ConfigurationFormResponse, DataType, LogEntry, LogLevel,
    RecordType, SchemaRequest, SchemaResponse, Table, TableList, TestRequest, TestResponse,
    UpdateRequest, UpdateResponse,
};
use crate::forms;
use crate::metadata::plain_column;
use crate::state::SyncState;
use crate::values::{double_value, long_value, record, string_value};

/// Demonstration source connector: declares a static two-table schema and
/// streams a small synthetic change set through the batch accumulator.
#[derive(Debug, Default)]
pub struct SourceService;

fn demo_tables() -> Vec<Table> {
    vec![
        Table {
            name: "table1".to_string(),
            columns: vec![
                crate::connector_proto::Column {
                    primary_key: true,
                    ..plain_column("a1", DataType::Unspecified)
                },
                plain_column("a2", DataType::Double),
            ],
        },
        Table {
            name: "table2".to_string(),
            columns: vec![
                crate::connector_proto::Column {
                    primary_key: true,
                    ..plain_column("b1", DataType::Unspecified)
                },
                plain_column("b2", DataType::Unspecified),
            ],
        },
    ]
}

fn log_message(level: LogLevel, message: impl Into<String>) -> UpdateResponse {
    UpdateResponse {
        response: Some(update_response::Response::LogEntry(LogEntry {
            level: level as i32,
            message: message.into(),
        })),
    }
}

type UpdateSender = mpsc::Sender<Result<UpdateResponse, Status>>;

async fn emit(tx: &UpdateSender, response: UpdateResponse) -> bool {
    // A closed channel means the client cancelled; stop producing.
    tx.send(Ok(response)).await.is_ok()
}

/// Produce one sync cycle. The checkpoint is the literal last message of the
/// stream so a consumer that persists it never resumes past unseen records.
async fn run_sync(mut state: SyncState, tx: UpdateSender) {
    if !emit(&tx, log_message(LogLevel::Info, "Sync STARTING")).await {
        return;
    }

    let mut accumulator = BatchAccumulator::new();
    let mut produced = 0u64;

    for _ in 0..3 {
        let upsert = record(
            "table1",
            RecordType::Upsert,
            [
                ("a1", string_value(format!("a-{}", state.cursor))),
                ("a2", double_value(33.445)),
            ],
        );
        state.cursor += 1;
        produced += 1;
        for response in accumulator.offer(upsert) {
            if !emit(&tx, response).await {
                return;
            }
        }
    }

    let upsert = record(
        "table2",
        RecordType::Upsert,
        [
            ("b1", string_value(format!("b-{}", state.cursor))),
            ("b2", long_value(99)),
        ],
    );
    state.cursor += 1;
    produced += 1;
    for response in accumulator.offer(upsert) {
        if !emit(&tx, response).await {
            return;
        }
    }
    if let Some(response) = accumulator.finish() {
        if !emit(&tx, response).await {
            return;
        }
    }

    // Updates and deletes are contractually individual messages; they bypass
    // the accumulator.
    let update = record(
        "table1",
        RecordType::Update,
        [
            ("a1", string_value("a-0")),
            ("a2", double_value(110.234)),
        ],
    );
    state.cursor += 1;
    produced += 1;
    if !emit(
        &tx,
        UpdateResponse {
            response: Some(update_response::Response::Record(update)),
        },
    )
    .await
    {
        return;
    }

    let delete = record("table1", RecordType::Delete, [("a1", string_value("a-2"))]);
    state.cursor += 1;
    produced += 1;
    if !emit(
        &tx,
        UpdateResponse {
            response: Some(update_response::Response::Record(delete)),
        },
    )
    .await
    {
        return;
    }

    if !emit(
        &tx,
        log_message(LogLevel::Info, format!("Sync DONE, {produced} records")),
    )
    .await
    {
        return;
    }

    let checkpoint = UpdateResponse {
        response: Some(update_response::Response::Checkpoint(Checkpoint {
            state_json: state.to_json(),
        })),
    };
    emit(&tx, checkpoint).await;
}

#[tonic::async_trait]
impl SourceConnector for SourceService {
    async fn configuration_form(
        &self,
        _request: Request<ConfigurationFormRequest>,
    ) -> Result<Response<ConfigurationFormResponse>, Status> {
        tracing::info!("fetching source configuration form");
        Ok(Response::new(forms::source_configuration_form()))
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

    async fn schema(
        &self,
        _request: Request<SchemaRequest>,
    ) -> Result<Response<SchemaResponse>, Status> {
        Ok(Response::new(SchemaResponse {
            without_schema: Some(TableList {
                tables: demo_tables(),
            }),
        }))
    }

    type UpdateStream = ReceiverStream<Result<UpdateResponse, Status>>;

    async fn update(
        &self,
        request: Request<UpdateRequest>,
    ) -> Result<Response<Self::UpdateStream>, Status> {
        let request = request.into_inner();
        let state = SyncState::restore(request.state_json.as_deref());
        tracing::info!(cursor = state.cursor, "starting sync");

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_sync(state, tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_stream::StreamExt;

    async fn collect_stream(state_json: Option<&str>) -> Vec<UpdateResponse> {
        let service = SourceService;
        let response = service
            .update(Request::new(UpdateRequest {
                configuration: HashMap::new(),
                state_json: state_json.map(str::to_string),
            }))
            .await
            .unwrap();
        let mut stream = response.into_inner();
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn stream_ends_with_exactly_one_checkpoint() {
        let responses = collect_stream(None).await;
        let checkpoints: Vec<&UpdateResponse> = responses
            .iter()
            .filter(|resp| {
                matches!(resp.response, Some(update_response::Response::Checkpoint(_)))
            })
            .collect();
        assert_eq!(checkpoints.len(), 1);
        assert!(matches!(
            responses.last().unwrap().response,
            Some(update_response::Response::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn checkpoint_resumes_from_restored_cursor() {
        let responses = collect_stream(Some(r#"{"cursor":5}"#)).await;
        let state_json = responses
            .iter()
            .find_map(|resp| match resp.response.as_ref() {
                Some(update_response::Response::Checkpoint(cp)) => Some(cp.state_json.clone()),
                _ => None,
            })
            .unwrap();
        let state = SyncState::restore(Some(&state_json));
        // Six records produced per cycle.
        assert_eq!(state.cursor, 11);
    }

    #[tokio::test]
    async fn batched_records_carry_typed_values() {
        use crate::connector_proto::value_type::Inner;

        let responses = collect_stream(None).await;
        let table2 = responses
            .iter()
            .filter_map(|resp| match resp.response.as_ref() {
                Some(update_response::Response::Records(batch)) => Some(&batch.records),
                _ => None,
            })
            .flatten()
            .find(|rec| rec.table_name == "table2")
            .unwrap();
        assert!(matches!(
            table2.data["b1"].inner,
            Some(Inner::String(ref v)) if v == "b-3"
        ));
        assert!(matches!(table2.data["b2"].inner, Some(Inner::Long(99))));
    }

    #[tokio::test]
    async fn updates_and_deletes_are_individual_messages() {
        let responses = collect_stream(None).await;
        let singles: Vec<i32> = responses
            .iter()
            .filter_map(|resp| match resp.response.as_ref() {
                Some(update_response::Response::Record(rec)) => Some(rec.r#type),
                _ => None,
            })
            .collect();
        assert_eq!(
            singles,
            vec![RecordType::Update as i32, RecordType::Delete as i32]
        );
    }

    #[tokio::test]
    async fn schema_declares_the_demo_tables() {
        let service = SourceService;
        let response = service
            .schema(Request::new(SchemaRequest {
                configuration: HashMap::new(),
            }))
            .await
            .unwrap();
        let tables = response.into_inner().without_schema.unwrap().tables;
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["table1", "table2"]);
        assert!(tables[0].columns[0].primary_key);
    }
}
