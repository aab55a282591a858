//! API Server
//!
//! Binds the router, wires the middleware stack, and runs until a shutdown
//! signal arrives.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Start the server and block until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.socket_addr()?;

        info!("🌐 Starting Cashdesk API Server");
        info!("   Listen: http://{}", addr);
        self.log_server_info();

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 API Server stopped gracefully");
        Ok(())
    }

    /// Assemble the router with the full middleware stack. The request
    /// timeout rides inside the router so it covers internal routes only;
    /// the callback route always answers with an envelope instead.
    fn create_app(&self) -> axum::Router {
        create_router(
            self.state.clone(),
            Duration::from_secs(self.config.request_timeout_secs),
        )
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (outermost so preflight is always answered)
        .layer(create_cors_layer(self.config.allowed_origins.clone()))
        // Tracing layer (last for complete request tracing)
        .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        info!("📋 Server Configuration:");
        info!("   Version: {}", env!("CARGO_PKG_VERSION"));
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!(
            "   API key: {}",
            if self.config.api_key.is_some() {
                "required for mutating routes"
            } else {
                "disabled"
            }
        );

        info!("📊 Available endpoints:");
        info!("   POST /callback/aggregator            - Provider settlement callback");
        info!("   POST /api/wallets                    - Provision wallet");
        info!("   GET  /api/wallets/:user_id           - Wallet snapshot");
        info!("   GET  /api/wallets/:user_id/transactions - Ledger history");
        info!("   POST /api/sessions                   - Open session");
        info!("   POST /api/sessions/:id/close         - Close session");
        info!("   GET  /api/sessions/:id               - Session detail");
        info!("   POST /api/rounds                     - Settle round");
        info!("   GET  /api/jackpots                   - Jackpot pools");
        info!("   GET  /api/jackpots/wins              - Recent jackpot wins");
        info!("   POST /api/launch                     - Game launch URL");
        info!("   GET  /health                         - Health check");
        info!("   GET  /metrics                        - Prometheus metrics");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
