//! ecgx-ap - ECG Analysis Pipeline service
//!
//! Accepts uploaded ECG recordings, runs the automated analysis pipeline
//! (signal processing, quality analysis, multi-model inference, clinical
//! consolidation), and drives the human validation workflow. Serves a
//! REST + SSE API on port 5910.

use anyhow::Result;
use ecgx_common::events::EventBus;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ecgx_ap::AppState;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5910";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting ecgx-ap (ECG Analysis Pipeline) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration and data folder
    let config = ecgx_common::config::load_config()?;
    let data_folder = ecgx_common::config::resolve_data_folder(&config);
    let db_path = ecgx_common::config::ensure_data_folder(&data_folder)?;
    info!("Data folder: {}", data_folder.display());
    info!("Database: {}", db_path.display());

    if config.models.is_empty() {
        tracing::warn!("No inference models configured, every analysis will fail and retry");
    }

    // Open or create the database
    let db_pool = ecgx_ap::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Event bus for SSE broadcasting
    let event_bus = EventBus::new(100);

    let state = AppState::new(db_pool, event_bus, &config);

    // Periodic notification retry sweep
    let sweep_dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.tick().await; // first tick is immediate, skip it
        loop {
            interval.tick().await;
            if let Err(err) = sweep_dispatcher.run_retry_sweep().await {
                tracing::warn!(error = %err, "Notification retry sweep failed");
            }
        }
    });

    let app = ecgx_ap::build_router(state);

    let bind_addr = config
        .bind_addr
        .as_deref()
        .unwrap_or(DEFAULT_BIND_ADDR)
        .to_string();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
