//! Paimen server - REST control plane for dynamically managed Kafka consumers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use paimen_core::Settings;
use paimen_runtime::{
    ConsumerSupervisor, LagInspector, MemoryStore, ProcessorFactory, SupervisorSettings,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use warp::Filter;

use paimen_server::api;
use paimen_server::api::ApiContext;

#[derive(Parser)]
#[command(name = "paimen")]
#[command(version)]
#[command(about = "Control plane for dynamically managed Kafka consumers", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8000, env = "PAIMEN_PORT")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "PAIMEN_BIND")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid environment configuration")?;
    init_tracing(&settings.log_level)?;

    if settings.database_url.is_some() {
        warn!("DATABASE_URL is set but this build wires the in-memory spec store; ignoring it");
    }

    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(ProcessorFactory::with_defaults());
    let supervisor = ConsumerSupervisor::new(store, factory, SupervisorSettings::from(&settings));
    let inspector = Arc::new(LagInspector::new(
        settings.kafka_bootstrap_servers.clone(),
        settings.inspector_timeout,
    ));

    let ctx = ApiContext {
        supervisor: supervisor.clone(),
        inspector,
    };
    let routes = api::routes(ctx).recover(api::handle_rejection);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.bind, cli.port))?;

    let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    info!(
        addr = %bound,
        bootstrap = %settings.kafka_bootstrap_servers,
        "paimen control plane listening"
    );
    server.await;

    // Stop every consumer, each bounded by the configured stop timeout.
    supervisor.shutdown().await;
    info!("all consumers stopped");
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid LOG_LEVEL {level:?} (expected DEBUG|INFO|WARN|ERROR)"))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("tracing subscriber already installed")?;
    Ok(())
}
