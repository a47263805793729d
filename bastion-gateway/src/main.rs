//! Entry point for the `bastion-gateway` HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use bastion_core::GatewayMetrics;
use bastion_gateway::{bootstrap, routes::create_router, GatewayConfig, RuntimeEnv};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let env = match RuntimeEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            tracing::error!(error = %e, "invalid environment");
            std::process::exit(1);
        }
    };

    let config = match &env.config_path {
        Some(path) => match GatewayConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("BASTION_CONFIG unset; no routes configured, every request will be refused");
            GatewayConfig::default()
        }
    };

    let metrics = match GatewayMetrics::new() {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to register metrics");
            std::process::exit(1);
        }
    };

    let pipeline = match bootstrap::from_env(&config, &env, metrics).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::error!(error = %e, "failed to build pipeline");
            std::process::exit(1);
        }
    };

    let sweeper = Arc::clone(&pipeline);
    let interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweeper.sweep();
        }
    });

    let app = create_router(pipeline);

    let listener = match tokio::net::TcpListener::bind(env.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %env.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %env.listen_addr, routes = config.routes.len(), "bastion-gateway listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        });
    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
