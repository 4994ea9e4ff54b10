use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vitrine_audit::AuditPipeline;
use vitrine_core::{LoggingConfig, VitrineConfig};
use vitrine_server::{AppState, create_router};

#[derive(Parser, Debug)]
#[command(name = "vitrine-server", version, about = "Vitrine admin backend")]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(long, env = "VITRINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = VitrineConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let pipeline = Arc::new(AuditPipeline::start(&config.audit).await?);
    let state = AppState::new(config.server.clone(), pipeline.clone())?;
    let app = create_router(state);

    let addr = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    tracing::info!(address = %addr, "vitrine-server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pipeline.shutdown().await;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
