//! HTTP surface of the authorization server.

pub mod consent_page;
pub mod metadata;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::oauth::AuthorizationServer;

/// Serve the router on `0.0.0.0:port` until Ctrl-C.
///
/// Starts the periodic cleanup sweep first when an interval is configured.
pub async fn run_http(server: AuthorizationServer, port: u16) -> anyhow::Result<()> {
    let server = Arc::new(server);

    let sweeper = server.config().cleanup_interval.map(|every| {
        tracing::info!(interval_secs = every.as_secs(), "Scheduling periodic cleanup");
        server.sweeper().start_periodic(every)
    });

    let router = create_router(Arc::clone(&server));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(issuer = %server.config().issuer, "HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    tracing::info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
