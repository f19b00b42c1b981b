//! Web server setup and startup.
//!
//! [`WebServer`] composes the Axum router and runs the HTTP listener until
//! a shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use oracle_agent::Orchestrator;

use crate::WebConfig;
use crate::api;
use crate::state::AppState;
use crate::ws;

/// The Oracle web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server around a shared orchestrator.
    pub fn new(config: WebConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let state = Arc::new(AppState::new(orchestrator, config.clone()));
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers(Any);

        Router::new()
            .route("/chat", get(ws::ws_handler))
            .route("/api/status", get(api::status))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            tools = self.state.orchestrator.tools().len(),
            "starting web server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
