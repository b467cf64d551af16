pub mod batch;
pub mod destination;
pub mod forms;
pub mod metadata;
pub mod migration;
pub mod server;
pub mod source;
pub mod state;
pub mod store;
pub mod table_ops;
pub mod values;

pub mod connector_proto {
    tonic::include_proto!("connectorsdk");
}
