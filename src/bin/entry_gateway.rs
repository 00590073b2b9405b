//! Entry Gateway Binary
//!
//! Receives decision events from the door controller and serves the recent
//! window to the dashboard.

use anyhow::Context;
use entry_guard::server::{shutdown_watch, wait_for_shutdown};
use entry_guard::{dashboard, EventStore, GatewayConfig, TransportServer};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    entry_guard::init_tracing();

    tracing::info!("Starting Entry Gateway v{}", entry_guard::VERSION);

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        listen = %config.listen_addr,
        dashboard = %config.dashboard_addr,
        captures_dir = %config.captures_dir.display(),
        capacity = config.store_capacity,
        "Configuration loaded"
    );

    let store = Arc::new(EventStore::new(config.store_capacity));
    let server = Arc::new(TransportServer::new(Arc::clone(&store), config.captures_dir.clone()).await?);

    let transport = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding transport listener on {}", config.listen_addr))?;
    let http = TcpListener::bind(config.dashboard_addr)
        .await
        .with_context(|| format!("binding dashboard on {}", config.dashboard_addr))?;
    tracing::info!("Dashboard listening on {}", config.dashboard_addr);

    let shutdown = shutdown_watch(tokio::signal::ctrl_c());
    let transport_shutdown = wait_for_shutdown(shutdown.clone());
    let http_shutdown = wait_for_shutdown(shutdown);

    let app = dashboard::router(store);
    let (transport_result, http_result) = tokio::join!(
        server.run(transport, transport_shutdown),
        async { axum::serve(http, app).with_graceful_shutdown(http_shutdown).await },
    );
    transport_result?;
    http_result?;

    tracing::info!("Gateway stopped");
    Ok(())
}
