use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use connector_examples::connector_proto::destination_connector_server::DestinationConnectorServer;
use connector_examples::connector_proto::source_connector_server::SourceConnectorServer;
use connector_examples::server::{destination_service, ServiceSelection};
use connector_examples::source::SourceService;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

/// Command-line interface definition for the connector examples server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "connector-examples",
    version,
    about = "Serves example source and destination connectors over gRPC.",
    long_about = None
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, value_name = "PORT", default_value_t = 50051)]
    port: u16,

    /// Which connector service(s) to expose.
    #[arg(long, value_enum, default_value = "both")]
    service: Service,

    /// Path to the destination's backing database. Defaults to in-memory.
    #[arg(long = "db", value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Tracing filter (info,warn,debug,trace). Can also be provided via CONNECTOR_LOG.
    #[arg(
        long = "log-level",
        value_name = "FILTER",
        default_value = "info",
        env = "CONNECTOR_LOG"
    )]
    log_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Service {
    Source,
    Destination,
    Both,
}

impl From<Service> for ServiceSelection {
    fn from(service: Service) -> Self {
        match service {
            Service::Source => ServiceSelection::Source,
            Service::Destination => ServiceSelection::Destination,
            Service::Both => ServiceSelection::Both,
        }
    }
}

fn init_tracing(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter).or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to init tracing subscriber: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter)?;
    let selection = ServiceSelection::from(cli.service);

    let addr: SocketAddr = format!("127.0.0.1:{}", cli.port)
        .parse()
        .with_context(|| format!("invalid listen port {}", cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        service = ?cli.service,
        db = ?cli.db_path,
        "connector-examples starting"
    );

    let mut builder = Server::builder();
    let router = match selection {
        ServiceSelection::Source => {
            builder.add_service(SourceConnectorServer::new(SourceService))
        }
        ServiceSelection::Destination => builder.add_service(DestinationConnectorServer::new(
            destination_service(cli.db_path)?,
        )),
        ServiceSelection::Both => builder
            .add_service(SourceConnectorServer::new(SourceService))
            .add_service(DestinationConnectorServer::new(destination_service(
                cli.db_path,
            )?)),
    };

    router
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("grpc server exited with error")?;

    Ok(())
}
