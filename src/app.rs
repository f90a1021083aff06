use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::channels::ChannelRegistry;
use crate::config::Config;
use crate::db::CollectionRepository;
use crate::ingest::StagingArea;
use crate::services::{CollectionService, IngestService, InsightService};

/// Running application: the HTTP server task
pub struct Application {
    pub server_handle: JoinHandle<Result<(), std::io::Error>>,
}

impl Application {
    /// Build services from config, rebuild the dataset from the staging
    /// directory and start serving
    pub async fn build(config: Config, pool: PgPool) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing application components");

        let channels = Arc::new(ChannelRegistry::load_or_default(
            config.channels_config.as_deref(),
        )?);
        info!(
            "Using {} channels, dedupe policy {}, refresh mode {:?}",
            channels.channels().len(),
            config.dedupe_policy,
            config.refresh_mode
        );

        let state = build_state(&config, channels, pool);

        // Recover whatever was staged before the last shutdown
        let summary = state.ingest_service.reload().await?;
        info!(
            "Loaded {} rows across {} dates from {}",
            summary.dataset_rows,
            summary.dates.len(),
            config.staging_dir.display()
        );

        let app = create_router(state).layer(TraceLayer::new_for_http());

        let addr = config.server_addr();
        info!("Starting HTTP server on {}", addr);

        let server_handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await
        });

        info!("Application initialized successfully");
        Ok(Self { server_handle })
    }

    /// Run until the server stops
    pub async fn run_until_stopped(self) -> Result<(), Box<dyn std::error::Error>> {
        self.server_handle.await??;
        Ok(())
    }
}

/// Wire repositories and services into the router state
pub fn build_state(config: &Config, channels: Arc<ChannelRegistry>, pool: PgPool) -> AppState {
    let collection_repo = CollectionRepository::new(pool);

    let ingest_service = IngestService::new(
        StagingArea::new(config.staging_dir.clone()),
        channels,
        config.dedupe_policy,
        config.refresh_mode,
    );
    let insight_service = InsightService::new(ingest_service.clone());
    let collection_service = CollectionService::new(collection_repo, ingest_service.clone());

    AppState {
        ingest_service,
        insight_service,
        collection_service,
    }
}
