//! Shared fixtures for integration tests
#![allow(dead_code)] // not every test binary uses every fixture

use async_trait::async_trait;
use ecgx_ap::db;
use ecgx_ap::inference::InferenceGateway;
use ecgx_ap::models::{ChannelKind, Patient, QuietHours, UserRole, ValidatorProfile};
use ecgx_ap::notify::NotificationDispatcher;
use ecgx_ap::orchestrator::AnalysisOrchestrator;
use ecgx_ap::types::{
    DiagnosticResult, EcgSignal, InferenceModel, ModelError, RecordingMetadata,
};
use ecgx_ap::workflow::ValidationWorkflow;
use ecgx_common::config::{ChannelConfig, PipelineConfig};
use ecgx_common::events::EventBus;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fixed-output model for pipeline tests
pub struct MockModel {
    pub name: String,
    pub result: Result<DiagnosticResult, String>,
}

#[async_trait]
impl InferenceModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(
        &self,
        _signal: &EcgSignal,
        _metadata: &RecordingMetadata,
    ) -> Result<DiagnosticResult, ModelError> {
        self.result.clone().map_err(ModelError::Internal)
    }
}

pub fn diag(model: &str, diagnosis: &str, confidence: f64) -> DiagnosticResult {
    DiagnosticResult {
        primary_diagnosis: diagnosis.to_string(),
        confidence,
        differential_diagnoses: vec![],
        findings: vec![],
        features: vec![],
        anomalies: vec![],
        measurements: Default::default(),
        interpretation: String::new(),
        recommendations: vec![],
        processing_time_ms: 5,
        model_name: model.to_string(),
        model_version: "test".to_string(),
    }
}

pub fn mock(name: &str, diagnosis: &str, confidence: f64) -> Arc<dyn InferenceModel> {
    Arc::new(MockModel {
        name: name.to_string(),
        result: Ok(diag(name, diagnosis, confidence)),
    })
}

pub fn failing_mock(name: &str) -> Arc<dyn InferenceModel> {
    Arc::new(MockModel {
        name: name.to_string(),
        result: Err("model service unavailable".to_string()),
    })
}

/// Pipeline config tuned for fast tests (no cooldown sleeps)
pub fn fast_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        retry_cooldown_secs: 0,
        ..PipelineConfig::default()
    }
}

/// Fully wired pipeline over an in-memory database and mock models
pub struct TestPipeline {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub workflow: Arc<ValidationWorkflow>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

pub async fn build_pipeline(
    models: Vec<Arc<dyn InferenceModel>>,
    config: PipelineConfig,
) -> TestPipeline {
    let pool = db::init_memory_pool().await.unwrap();
    let event_bus = EventBus::new(256);

    let gateway = Arc::new(InferenceGateway::new(
        models,
        Duration::from_secs(config.inference_deadline_secs),
        config.min_model_confidence,
    ));

    // No webhooks configured: only in-app delivery is available
    let dispatcher = Arc::new(NotificationDispatcher::from_config(
        pool.clone(),
        &ChannelConfig::default(),
        event_bus.clone(),
    ));

    let workflow = Arc::new(ValidationWorkflow::new(
        pool.clone(),
        event_bus.clone(),
        Arc::clone(&dispatcher),
        config.senior_experience_years,
    ));

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        pool.clone(),
        event_bus.clone(),
        config,
        gateway,
        Arc::clone(&workflow),
        Arc::clone(&dispatcher),
    ));

    TestPipeline {
        pool,
        event_bus,
        orchestrator,
        workflow,
        dispatcher,
    }
}

pub async fn seed_patient(pool: &SqlitePool) -> Uuid {
    let patient = Patient {
        guid: Uuid::new_v4(),
        name: "Test Patient".into(),
        birth_date: chrono::NaiveDate::from_ymd_opt(1970, 6, 15),
    };
    db::directory::upsert_patient(pool, &patient).await.unwrap();
    patient.guid
}

pub async fn seed_user(
    pool: &SqlitePool,
    role: UserRole,
    years_experience: u32,
    available: bool,
) -> Uuid {
    let profile = ValidatorProfile {
        guid: Uuid::new_v4(),
        name: format!("Dr. {:?} ({}y)", role, years_experience),
        role,
        years_experience,
        available,
        enabled_channels: vec![ChannelKind::InApp, ChannelKind::Email],
        quiet_hours: None::<QuietHours>,
    };
    db::directory::upsert_user(pool, &profile).await.unwrap();
    profile.guid
}

/// Write a small two-lead CSV recording into `dir`
pub fn write_csv_recording(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("recording.csv");
    let mut content = String::from("I,II\n");
    for i in 0..2000 {
        let t = i as f32 / 500.0;
        let a = (2.0 * std::f32::consts::PI * 1.2 * t).sin();
        let b = (2.0 * std::f32::consts::PI * 1.2 * t + 0.5).sin();
        content.push_str(&format!("{:.4},{:.4}\n", a, b));
    }
    std::fs::write(&path, content).unwrap();
    path
}
