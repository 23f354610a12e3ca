//! ECG analysis pipeline service library
//!
//! Exposes the pipeline stages and the HTTP surface for integration
//! testing.

pub mod api;
pub mod consolidate;
pub mod db;
pub mod error;
pub mod inference;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod quality;
pub mod signal;
pub mod types;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use crate::inference::{HttpModelClient, InferenceGateway};
use crate::notify::NotificationDispatcher;
use crate::orchestrator::AnalysisOrchestrator;
use crate::workflow::ValidationWorkflow;
use axum::Router;
use chrono::{DateTime, Utc};
use ecgx_common::config::TomlConfig;
use ecgx_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Pipeline orchestrator (submission + background processing)
    pub orchestrator: Arc<AnalysisOrchestrator>,
    /// Validation workflow
    pub workflow: Arc<ValidationWorkflow>,
    /// Notification dispatcher (shared with the retry sweep)
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the full pipeline from configuration
    pub fn new(db: SqlitePool, event_bus: EventBus, config: &TomlConfig) -> Self {
        let pipeline = &config.pipeline;

        let models = config
            .models
            .iter()
            .filter_map(|endpoint| {
                match HttpModelClient::new(
                    endpoint.name.clone(),
                    endpoint.url.clone(),
                    Duration::from_secs(pipeline.inference_deadline_secs),
                ) {
                    Ok(client) => Some(Arc::new(client) as Arc<dyn types::InferenceModel>),
                    Err(err) => {
                        tracing::error!(model = %endpoint.name, error = %err, "Model client build failed, skipping");
                        None
                    }
                }
            })
            .collect();

        let gateway = Arc::new(InferenceGateway::new(
            models,
            Duration::from_secs(pipeline.inference_deadline_secs),
            pipeline.min_model_confidence,
        ));

        let dispatcher = Arc::new(NotificationDispatcher::from_config(
            db.clone(),
            &config.channels,
            event_bus.clone(),
        ));

        let workflow = Arc::new(ValidationWorkflow::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&dispatcher),
            pipeline.senior_experience_years,
        ));

        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            pipeline.clone(),
            gateway,
            Arc::clone(&workflow),
            Arc::clone(&dispatcher),
        ));

        Self {
            db,
            event_bus,
            orchestrator,
            workflow,
            dispatcher,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analysis_routes())
        .merge(api::validation_routes())
        .merge(api::notification_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
        // CORS for browser clients on other local ports
        .layer(tower_http::cors::CorsLayer::permissive())
}
