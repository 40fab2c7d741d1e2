//! Fleet service server

use std::sync::Arc;
use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use dfm_core::{BatteryAudit, FleetService, FleetStore, MemoryStore, SqliteStore};

use crate::api::{create_router, ApiState};
use crate::config::{ServerConfig, StorageBackend};

/// Owns the fleet context for the lifetime of the process: store, service,
/// HTTP listener and battery audit.
pub struct DfmServer {
    config: ServerConfig,
    store: Arc<dyn FleetStore>,
    fleet: Arc<FleetService>,
    shutdown_tx: watch::Sender<bool>,
}

impl DfmServer {
    /// Create new server, opening the configured store
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn FleetStore> = match config.storage_backend() {
            StorageBackend::Sqlite => {
                info!("Opening SQLite store at {}", config.database_path.display());
                Arc::new(SqliteStore::new(&config.database_path)?)
            }
            StorageBackend::Memory => {
                info!("Using in-memory store, fleet state will not survive a restart");
                MemoryStore::new_shared()
            }
        };

        Ok(Self::with_store(config, store))
    }

    /// Create a server over an already opened store
    pub fn with_store(config: ServerConfig, store: Arc<dyn FleetStore>) -> Self {
        let fleet = Arc::new(FleetService::new(store.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            store,
            fleet,
            shutdown_tx,
        }
    }

    pub fn fleet(&self) -> Arc<FleetService> {
        self.fleet.clone()
    }

    /// The HTTP application, with request tracing
    pub fn router(&self) -> Router {
        let api_state = ApiState {
            fleet: self.fleet.clone(),
        };

        create_router(api_state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Serve until SIGINT, SIGTERM or [`DfmServer::shutdown`]
    pub async fn run(&self) -> Result<()> {
        info!("Starting fleet service on {}", self.config.listen_addr);

        // Start battery audit
        let audit = BatteryAudit::new(self.store.clone(), self.config.audit_interval()).start();

        let app = self.router();

        // Start HTTP server
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!("HTTP server listening on {}", self.config.listen_addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(self.shutdown_tx.subscribe()))
            .await;

        audit.stop().await;
        info!("Fleet service stopped");

        served?;
        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    match sigterm {
                        Some(ref mut sigterm) => {
                            sigterm.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = async {
                if *shutdown.borrow_and_update() {
                    return;
                }
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            } => {
                info!("Shutdown requested");
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn memory_config() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            storage: "memory".to_string(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_opens_sqlite_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            database_path: temp_dir.path().join("fleet.db"),
            storage: "sqlite".to_string(),
            ..memory_config()
        };

        let server = DfmServer::new(config).unwrap();
        assert!(server.fleet().list_drones().await.unwrap().is_empty());
        assert!(temp_dir.path().join("fleet.db").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = Arc::new(DfmServer::new(memory_config()).unwrap());

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ServerConfig {
            audit_interval_seconds: 0,
            ..memory_config()
        };
        assert!(DfmServer::new(config).is_err());
    }
}
