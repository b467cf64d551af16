use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::connector_proto::destination_connector_server::DestinationConnectorServer;
use crate::connector_proto::source_connector_server::SourceConnectorServer;
use crate::destination::DestinationService;
use crate::metadata::TableRegistry;
use crate::source::SourceService;
use crate::store::Store;

/// Which connector services a process exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSelection {
    Source,
    Destination,
    Both,
}

impl ServiceSelection {
    pub fn source(self) -> bool {
        matches!(self, Self::Source | Self::Both)
    }

    pub fn destination(self) -> bool {
        matches!(self, Self::Destination | Self::Both)
    }
}

/// Runs the gRPC server on its own thread with an owned runtime; dropping
/// the handle shuts the server down and joins the thread. Used by tests and
/// embedders that want a self-contained server.
pub struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl ServerHandle {
    pub fn spawn(
        addr: SocketAddr,
        selection: ServiceSelection,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let thread = thread::spawn(move || -> Result<()> {
            let runtime = Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .context("failed to bind tcp listener")?;
                let mut builder = Server::builder();
                let router = match selection {
                    ServiceSelection::Source => {
                        builder.add_service(SourceConnectorServer::new(SourceService))
                    }
                    ServiceSelection::Destination => builder.add_service(
                        DestinationConnectorServer::new(destination_service(db_path)?),
                    ),
                    ServiceSelection::Both => builder
                        .add_service(SourceConnectorServer::new(SourceService))
                        .add_service(DestinationConnectorServer::new(destination_service(
                            db_path,
                        )?)),
                };
                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .context("grpc server exited with error")?;
                Ok(())
            })
        });

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

pub fn destination_service(db_path: Option<PathBuf>) -> Result<DestinationService> {
    let store = match db_path {
        Some(path) => Store::open(&path)
            .with_context(|| format!("failed to open store at {}", path.display()))?,
        None => Store::open_in_memory().context("failed to open in-memory store")?,
    };
    Ok(DestinationService::new(TableRegistry::new(), store))
}
