//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::rocks_store::RocksMetaStore;
use crate::coordinator::server_registry::TabletServerRegistry;
use crate::coordinator::service::CoordinatorService;
use std::sync::Arc;
use std::time::Duration;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!(
            "  Table defaults: {} buckets, replication factor {}",
            self.config.default_bucket_number,
            self.config.default_replication_factor
        );
        match self.config.datalake_format {
            Some(format) => tracing::info!("  Datalake format: {}", format),
            None => tracing::info!("  Datalake: disabled"),
        }

        let store = Arc::new(RocksMetaStore::open(&self.config.db_path)?);
        let session_timeout = self.config.server_session_timeout();
        let bind_addr = self.config.bind_addr;
        let service = Arc::new(CoordinatorService::start(self.config, store)?);

        let expiry = tokio::spawn(expire_sessions(service.servers().clone(), session_timeout));

        let router = create_router(CoordState {
            service: service.clone(),
        });
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        tracing::info!(
            "✓ Coordinator ready (epoch {})",
            service.coordinator_epoch()
        );

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &result {
            tracing::error!("HTTP server error: {}", e);
        }

        expiry.abort();
        service.shutdown().await;
        tracing::info!("Coordinator {} stopped", self.node_id);
        result.map_err(Into::into)
    }
}

/// Expire tablet servers that stopped heartbeating.
async fn expire_sessions(servers: Arc<TabletServerRegistry>, timeout: Duration) {
    let period = (timeout / 3).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match servers.expire_stale(timeout) {
            Ok(expired) if !expired.is_empty() => {
                tracing::warn!("Expired tablet servers {:?}", expired);
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to expire tablet server sessions: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
