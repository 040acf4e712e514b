use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transport_engine::config::EngineConfig;
use transport_engine::engine::Engine;
use transport_engine::web::{AppState, create_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("transport_engine=info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    let addr = config.listen_addr;

    let mut engine = Engine::new(config)?;
    engine.start();
    let engine = Arc::new(engine);

    let app = create_router(AppState::new(Arc::clone(&engine)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, boards = engine.monitored().len(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
