//! HTTP transport for IPFS commands.
//!
//! This crate provides:
//! - the command route served by a daemon (`POST /api/v0/<path>`)
//! - server configuration and error mapping to HTTP status codes
//! - a client that runs commands on a daemon for the local CLI
//!
//! Requests are executed in the server context, so PostRun phases never run
//! on this side of the transport.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use client::ApiClient;
pub use config::ServerConfig;
pub use error::{HttpError, HttpResult};
pub use handler::{ApiState, handle_command};

/// Build the command router for `state`.
pub fn router(state: Arc<ApiState>) -> Router {
    let route = format!("{}/{{*path}}", state.config.prefix());
    let limit = state.config.max_body_size;
    Router::new()
        .route(&route, post(handle_command))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured listen address.
pub async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = config.listen_addr.parse()?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serve `state` on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: Arc<ApiState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Serving command API on {}{}", addr, state.config.prefix());
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Command API stopped");
    Ok(())
}
