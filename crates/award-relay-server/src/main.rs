#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::dispatch::coordinator::Dispatcher;
use server::pool::worker::RetryPolicy;
use server::service::handler::AwardService;
use server::source::roblox::RobloxBadges;
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;

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

    let providers = init_telemetry()?;

    let source = RobloxBadges::new(
        config.source_url.clone(),
        config.proxy.as_deref(),
        config.request_timeout,
    )
    .context("failed to build HTTP client for the award source")?;
    let service = AwardService::new(Dispatcher::spawn(
        config.task_threads,
        source,
        RetryPolicy::default(),
    ));

    let listener = bind(&config).await?;
    log_startup_info(&listener.local_addr()?, &config);

    axum::serve(listener, service.router())
        .with_graceful_shutdown(shutdown_signal(service.clone(), config, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = tokio::net::lookup_host(config.server_addr.as_str())
        .await
        .with_context(|| format!("failed to resolve {}", config.server_addr))?
        .next()
        .with_context(|| format!("{} resolved to no addresses", config.server_addr))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;

    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuseport(true)?;
    }
    #[cfg(not(unix))]
    if config.reuse_port {
        tracing::warn!("SO_REUSEPORT is not supported on this platform; ignoring");
    }

    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    Ok(socket.listen(1024)?)
}

fn log_startup_info(addr: &SocketAddr, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting award relay on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting award relay on {} with {} workers",
            addr,
            config.task_threads
        );
    }
}

async fn shutdown_signal(
    service: AwardService,
    config: ServerConfig,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Health flips to not-serving as soon as the dispatcher stops accepting.
    service.shutdown(config.shutdown_timeout).await;

    providers.shutdown();
}
