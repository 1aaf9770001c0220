//! Server lifecycle management
//!
//! Binds the HTTP listener, serves until Ctrl+C or SIGTERM, then closes
//! every room and peer session.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use huddle_api::{create_router, AppState};
use huddle_core::Config;
use huddle_sfu::{RoomFactory, SessionFactory};

pub struct HuddleServer {
    config: Arc<Config>,
    factory: Arc<RoomFactory>,
    sessions: Arc<dyn SessionFactory>,
}

impl HuddleServer {
    pub fn new(
        config: Config,
        factory: Arc<RoomFactory>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            sessions,
        }
    }

    /// Serve HTTP until a shutdown signal arrives
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let http_addr: SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let router = create_router(AppState {
            factory: Arc::clone(&self.factory),
            sessions: Arc::clone(&self.sessions),
            config: Arc::clone(&self.config),
        });

        info!(address = %http_addr, "HTTP server listening");

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.shutdown().await;

        if let Err(e) = result {
            error!(error = %e, "HTTP server error");
            return Err(e.into());
        }
        Ok(())
    }

    async fn shutdown(&self) {
        info!(rooms = self.factory.room_count(), "Shutting down Huddle server...");
        self.factory.shutdown().await;
        info!("Huddle server shut down gracefully");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received, starting graceful shutdown...");
}
