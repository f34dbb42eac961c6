//! API Server - HTTP server for the relay REST API

use axum::{
    routing::{get, post},
    Router,
};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handlers::{self, AppState};
use crate::api::installation;
use crate::config::ApiConfig;
use crate::context::RelayContext;

/// Build the router with all routes
pub fn router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let relay_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route(
            "/senders",
            get(handlers::list_senders).post(handlers::add_sender),
        )
        .route(
            "/senders/:id",
            get(handlers::get_sender)
                .put(handlers::update_sender)
                .delete(handlers::delete_sender),
        )
        .route("/configure_sasl", post(handlers::configure_sasl))
        .route("/reset_sasl", post(handlers::reset_sasl))
        .route("/send_test_email", post(handlers::send_test_email))
        .route("/mail_queue", get(handlers::mail_queue))
        .route("/flush_queue", post(handlers::flush_queue))
        .route("/mail_log", get(handlers::mail_log))
        .route(
            "/backups",
            get(handlers::list_backups).post(handlers::create_backup),
        )
        .route("/backups/:name/restore", post(handlers::restore_backup))
        .route(
            "/backups/:name",
            axum::routing::delete(handlers::delete_backup),
        );

    let installation_routes = Router::new()
        .route("/status", get(installation::status))
        .route("/system", get(installation::system))
        .route("/providers", get(installation::providers))
        .route("/steps/:step", get(installation::step))
        .route("/validate", post(installation::validate))
        .route("/install", post(installation::install))
        .route("/uninstall", post(installation::uninstall));

    Router::new()
        .nest("/api", relay_routes)
        .nest("/api/installation", installation_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind the configured port, or the first free port of the fallback range
pub async fn bind(config: &ApiConfig) -> io::Result<TcpListener> {
    let primary = format!("{}:{}", config.listen_addr, config.port);
    match TcpListener::bind(&primary).await {
        Ok(listener) => return Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            warn!("Port {} is in use, looking for a free port", config.port);
        }
        Err(e) => return Err(e),
    }

    for port in config.fallback_port_start..=config.fallback_port_end {
        if let Ok(listener) = TcpListener::bind((config.listen_addr.as_str(), port)).await {
            return Ok(listener);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!(
            "No free port in {}-{}",
            config.fallback_port_start, config.fallback_port_end
        ),
    ))
}

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(relay: RelayContext) -> Self {
        Self {
            state: Arc::new(AppState { relay }),
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the API server; returns when the process is interrupted
    pub async fn run(&self) -> io::Result<()> {
        let listener = bind(&self.state.relay.config.api).await?;
        info!("Starting API server on {}", listener.local_addr()?);

        let paths = &self.state.relay.config.paths;
        info!("Sender file path: {}", paths.sender_store.display());
        info!("SASL config path: {}", paths.relay_store.display());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_config(port: u16, start: u16, end: u16) -> ApiConfig {
        ApiConfig {
            listen_addr: "127.0.0.1".to_string(),
            port,
            fallback_port_start: start,
            fallback_port_end: end,
        }
    }

    #[tokio::test]
    async fn test_bind_falls_back_when_port_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fallback = free.local_addr().unwrap().port();
        drop(free);

        let listener = bind(&api_config(port, fallback, fallback)).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), fallback);
    }

    #[tokio::test]
    async fn test_bind_fails_when_range_exhausted() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(&api_config(port, port, port)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }
}
