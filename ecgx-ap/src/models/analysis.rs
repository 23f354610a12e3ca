//! ECG analysis lifecycle state machine
//!
//! An analysis progresses PENDING → PROCESSING → {COMPLETED | FAILED}.
//! FAILED → PENDING is the only backward transition, taken automatically
//! while `retry_count` is below the configured maximum. Clinical outputs
//! exist iff status is COMPLETED; they are written atomically with the
//! COMPLETED transition.

use crate::types::{Anomaly, Feature, Finding};
use chrono::{DateTime, Utc};
use ecgx_common::ClinicalUrgency;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analysis lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    /// Created, waiting for (or cooling down before) a processing run
    Pending,
    /// A background task is actively processing this analysis
    Processing,
    /// Clinical outputs persisted; record immutable except validation status
    Completed,
    /// Last run failed; terminal once retries are exhausted
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AnalysisStatus::Pending),
            "PROCESSING" => Some(AnalysisStatus::Processing),
            "COMPLETED" => Some(AnalysisStatus::Completed),
            "FAILED" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }

    /// Whether the transition `self → next` is legal
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (AnalysisStatus::Pending, AnalysisStatus::Processing)
                | (AnalysisStatus::Processing, AnalysisStatus::Completed)
                | (AnalysisStatus::Processing, AnalysisStatus::Failed)
                | (AnalysisStatus::Failed, AnalysisStatus::Pending)
        )
    }
}

/// Consolidated clinical outputs, populated iff status = COMPLETED
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalReport {
    /// Final ensemble confidence, 0.0–1.0
    pub ai_confidence: f64,
    /// Raw per-model predictions, preserved for audit
    pub raw_predictions: serde_json::Value,
    /// Interpretability payload (contributing models, rejections)
    pub interpretability: serde_json::Value,
    pub heart_rate_bpm: Option<f64>,
    pub pr_ms: Option<f64>,
    pub qrs_ms: Option<f64>,
    pub qt_ms: Option<f64>,
    pub qtc_ms: Option<f64>,
    /// Rhythm label (e.g., "Sinus Rhythm", "Atrial Fibrillation")
    pub rhythm: String,
    pub primary_diagnosis: String,
    pub secondary_diagnosis: Option<String>,
    /// ICD-10 codes for the primary/secondary diagnoses
    pub icd10_codes: Vec<String>,
    pub clinical_urgency: ClinicalUrgency,
    pub requires_immediate_attention: bool,
    pub recommendations: Vec<String>,
    /// Consolidated findings, deduplicated across models
    pub findings: Vec<Finding>,
    pub features: Vec<Feature>,
    pub anomalies: Vec<Anomaly>,
    /// Signal quality score, 0.0–1.0
    pub quality_score: f64,
    pub noise_level: f64,
    pub baseline_wander: f64,
}

/// One ECG analysis record (one per submitted recording)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcgAnalysis {
    /// Globally unique, client-opaque identifier
    pub guid: Uuid,
    pub patient_id: Uuid,
    /// Created-by relation only, not an exclusive lifetime owner
    pub created_by: Uuid,

    /// Source file reference
    pub file_path: String,
    pub filename: String,
    /// SHA-256 of the raw file contents
    pub content_hash: String,
    pub file_size: u64,
    pub sample_rate: Option<u32>,
    pub duration_secs: Option<f64>,
    pub lead_count: Option<usize>,
    pub lead_names: Vec<String>,
    pub device: Option<String>,

    /// Lifecycle
    pub status: AnalysisStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,

    /// Clinical outputs, present iff status = COMPLETED
    pub report: Option<ClinicalReport>,

    /// Soft delete marker; records are never physically deleted
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EcgAnalysis {
    /// Create a new analysis in PENDING state
    pub fn new(patient_id: Uuid, created_by: Uuid, file_path: String, filename: String) -> Self {
        let now = Utc::now();
        Self {
            guid: Uuid::new_v4(),
            patient_id,
            created_by,
            file_path,
            filename,
            content_hash: String::new(),
            file_size: 0,
            sample_rate: None,
            duration_secs: None,
            lead_count: None,
            lead_names: Vec::new(),
            device: None,
            status: AnalysisStatus::Pending,
            retry_count: 0,
            error_message: None,
            processing_started_at: None,
            processing_completed_at: None,
            processing_duration_ms: None,
            report: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record is in a terminal state given the retry budget
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        match self.status {
            AnalysisStatus::Completed => true,
            AnalysisStatus::Failed => self.retry_count >= max_retries,
            _ => false,
        }
    }

    /// Field-gating invariant: clinical outputs exist iff COMPLETED
    pub fn invariant_holds(&self) -> bool {
        (self.status == AnalysisStatus::Completed) == self.report.is_some()
    }
}
