use clap::Parser;
use numclaim_core::telemetry::{TelemetryProviders, init_telemetry};
use numclaim_gateway::server::{
    config::{CliArgs, ServerConfig},
    service::{create_router, handler::GatewayService},
    telemetry::{SERVICE_NAME, init_metric_handles},
};
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

    let listener = TcpListener::bind(config.gateway_addr).await?;
    log_startup_info(&config);

    let service = GatewayService::new(&config)?;
    let app = create_router(service.clone());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(service, providers))
    .await?;

    tracing::info!("Gateway shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting gateway on {} with full config: {:#?}",
            config.gateway_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting gateway on {} -> {} with {} workers, {} requests per {}s per client",
            config.gateway_addr,
            config.backend_url,
            config.num_workers,
            config.max_requests_per_window,
            config.rate_limit_window.as_secs()
        );
    }
}

async fn shutdown_signal(service: GatewayService, providers: TelemetryProviders) {
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

    tracing::info!("Shutdown signal received, draining in-flight requests...");

    service.shutdown().await;
    providers.shutdown();
}
