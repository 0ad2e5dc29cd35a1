use clap::Parser;
use numclaim_backend::server::{
    config::{CliArgs, ServerConfig, StorageKind},
    service::{create_router, handler::BackendService},
    startup::{TokioSleep, connect_with_retry},
    store::{ClaimStore, memory::MemoryClaimStore, postgres::PgClaimStore},
    telemetry::{SERVICE_NAME, init_metric_handles},
};
use numclaim_core::telemetry::init_telemetry;
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(SERVICE_NAME, config.log_format)?;
    init_metric_handles();
    log_startup_info(&config);

    match config.storage {
        StorageKind::Postgres => {
            let store = connect_with_retry::<TokioSleep, _, _, _, _>(config.connect_retry, |_| {
                PgClaimStore::connect(&config.database)
            })
            .await?;

            let served = serve(store.clone(), &config).await;
            store.close().await;
            tracing::info!("Database pool closed");
            served?;
        }
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; claims are lost on restart");
            serve(MemoryClaimStore::new(), &config).await?;
        }
    }

    tracing::info!("Backend shut down successfully");
    providers.shutdown();
    Ok(())
}

async fn serve<S: ClaimStore>(store: S, config: &ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.backend_addr).await?;
    tracing::info!("Listening on {}", config.backend_addr);

    let app = create_router(BackendService::new(store, config.trust_forwarded_for));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting backend with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting backend on {} with {:?} storage",
            config.backend_addr,
            config.storage
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, finishing in-flight requests...");
}
