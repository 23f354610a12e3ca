//! Core types and trait definitions for the ECG analysis pipeline
//!
//! Defines the shared vocabulary of the pipeline stages:
//! - `EcgSignal` / `RecordingMetadata` — preprocessed waveform + acquisition info
//! - `DiagnosticResult` — one model's typed output (no dict-shaped payloads;
//!   required fields are validated at the gateway boundary)
//! - `InferenceModel` — the black-box model capability, async so transports
//!   can be local or RPC, and mockable in tests
//! - Per-layer error enums with explicit retry semantics

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Signal types
// ============================================================================

/// Preprocessed multi-lead ECG signal
///
/// `leads[i]` holds the samples for `lead_names[i]`; all leads have the
/// same length. Values are z-score normalized per lead.
#[derive(Debug, Clone)]
pub struct EcgSignal {
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Lead names in channel order (e.g., "I", "II", ..., "V6")
    pub lead_names: Vec<String>,
    /// Per-lead sample data, leads × samples
    pub leads: Vec<Vec<f32>>,
}

impl EcgSignal {
    /// Number of leads
    pub fn lead_count(&self) -> usize {
        self.leads.len()
    }

    /// Samples per lead (0 for an empty signal)
    pub fn samples_per_lead(&self) -> usize {
        self.leads.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Recording duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_per_lead() as f64 / self.sample_rate as f64
    }
}

/// Acquisition metadata extracted while loading a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Recording duration in seconds
    pub duration_secs: f64,
    /// Number of leads
    pub lead_count: usize,
    /// Lead names in channel order
    pub lead_names: Vec<String>,
    /// Samples per lead
    pub sample_count: usize,
    /// Acquisition device description, when the file carries one
    pub device: Option<String>,
    /// SHA-256 hash of the raw file contents
    pub content_hash: String,
    /// Raw file size in bytes
    pub file_size: u64,
}

// ============================================================================
// Model output types
// ============================================================================

/// Finding severity as reported by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Critical => "critical",
        }
    }

    /// Severities that force the urgent tier when paired with high confidence
    pub fn is_high_acuity(&self) -> bool {
        matches!(self, Severity::Severe | Severity::Critical)
    }
}

/// A clinical finding reported by a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Human-readable description (dedup key, case-insensitive)
    pub description: String,
    /// Severity, when the model grades it
    pub severity: Option<Severity>,
}

/// A derived waveform feature (e.g., "ST elevation V2", value in mV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Feature description (dedup key, case-insensitive)
    pub description: String,
    /// Numeric value when applicable
    pub value: Option<f64>,
}

/// A localized anomaly reported by a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Anomaly type (e.g., "st_elevation"); part of the dedup key
    pub kind: String,
    /// Lead or region (e.g., "V2-V4"); part of the dedup key
    pub location: Option<String>,
    /// Description for display
    pub description: String,
    /// Severity, when graded
    pub severity: Option<Severity>,
}

/// Interval measurements reported by a single model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMeasurements {
    pub heart_rate_bpm: Option<f64>,
    pub pr_ms: Option<f64>,
    pub qrs_ms: Option<f64>,
    pub qt_ms: Option<f64>,
    pub qtc_ms: Option<f64>,
}

/// One model's complete diagnostic output
///
/// Required fields (`primary_diagnosis`, `confidence`, `model_name`) are
/// validated at the gateway boundary; a result missing them never reaches
/// consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// Primary diagnosis label (vote key for ensemble consolidation)
    pub primary_diagnosis: String,
    /// Model confidence in the primary diagnosis, 0.0–1.0
    pub confidence: f64,
    /// Differential diagnoses in the model's own ranking
    #[serde(default)]
    pub differential_diagnoses: Vec<String>,
    /// Clinical findings
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Waveform features
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Localized anomalies
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    /// Interval measurements
    #[serde(default)]
    pub measurements: ModelMeasurements,
    /// Free-text interpretation
    #[serde(default)]
    pub interpretation: String,
    /// Model recommendations
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Model-side processing time in milliseconds
    #[serde(default)]
    pub processing_time_ms: u64,
    /// Model identity
    pub model_name: String,
    #[serde(default)]
    pub model_version: String,
}

// ============================================================================
// Model trait
// ============================================================================

/// Black-box ECG interpretation model
///
/// All models implement this trait for uniform fan-out execution in the
/// inference gateway. Implementations must be cancel-safe: the gateway
/// drops in-flight calls when the overall deadline expires.
#[async_trait::async_trait]
pub trait InferenceModel: Send + Sync {
    /// Model name for provenance and the per-model result map
    fn name(&self) -> &str;

    /// Run inference on a preprocessed signal
    ///
    /// # Errors
    /// Returns `ModelError` on transport or model failure; the gateway
    /// isolates failures per model.
    async fn infer(
        &self,
        signal: &EcgSignal,
        metadata: &RecordingMetadata,
    ) -> Result<DiagnosticResult, ModelError>;
}

/// Per-model inference error
#[derive(Debug, Error)]
pub enum ModelError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Model service returned an error response
    #[error("Model API error: {0}")]
    Api(String),

    /// Failed to parse the model response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Response missing a required field (typed-boundary validation)
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Layer errors
// ============================================================================

/// Signal loading / preprocessing error
///
/// Input errors are fatal for the analysis (surfaced immediately, never
/// retried).
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Recording file does not exist
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// File format not recognized or unparsable
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Declared lead count does not match parsed channels
    #[error("Lead mismatch: declared {declared}, parsed {actual}")]
    LeadMismatch { declared: usize, actual: usize },

    /// Structurally valid file with unusable contents (e.g., empty leads)
    #[error("Malformed signal data: {0}")]
    MalformedData(String),

    /// I/O error while reading
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessingError {
    /// Input errors are not retried; the analysis fails terminally
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Io(_))
    }
}

/// Inference-layer failure at the analysis level (retryable)
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Every requested model failed
    #[error("all models failed")]
    AllModelsFailed,

    /// Models ran but no result survived confidence filtering
    #[error("no usable model output")]
    NoUsableOutput,
}

/// Why a model's result was excluded from consolidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelRejection {
    /// Model call failed (message preserved for diagnostics)
    Failed(String),
    /// Result confidence fell below the configured minimum
    LowConfidence { confidence: f64, minimum: f64 },
    /// Deadline expired before the model returned
    DeadlineExpired,
}

impl std::fmt::Display for ModelRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRejection::Failed(msg) => write!(f, "failed: {}", msg),
            ModelRejection::LowConfidence { confidence, minimum } => {
                write!(f, "confidence {:.2} below minimum {:.2}", confidence, minimum)
            }
            ModelRejection::DeadlineExpired => write!(f, "deadline expired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_duration_from_samples() {
        let signal = EcgSignal {
            sample_rate: 500,
            lead_names: vec!["I".into(), "II".into()],
            leads: vec![vec![0.0; 5000], vec![0.0; 5000]],
        };
        assert_eq!(signal.lead_count(), 2);
        assert_eq!(signal.samples_per_lead(), 5000);
        assert!((signal.duration_secs() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_sample_rate_has_zero_duration() {
        let signal = EcgSignal {
            sample_rate: 0,
            lead_names: vec![],
            leads: vec![],
        };
        assert_eq!(signal.duration_secs(), 0.0);
    }

    #[test]
    fn severity_acuity() {
        assert!(Severity::Severe.is_high_acuity());
        assert!(Severity::Critical.is_high_acuity());
        assert!(!Severity::Moderate.is_high_acuity());
    }

    #[test]
    fn diagnostic_result_deserializes_with_defaults() {
        let json = r#"{
            "primary_diagnosis": "Normal",
            "confidence": 0.92,
            "model_name": "rhythmnet-v2"
        }"#;
        let result: DiagnosticResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.primary_diagnosis, "Normal");
        assert!(result.findings.is_empty());
        assert!(result.measurements.heart_rate_bpm.is_none());
    }

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!ProcessingError::UnsupportedFormat("xyz".into()).is_retryable());
        assert!(!ProcessingError::FileNotFound(PathBuf::from("/x")).is_retryable());
    }
}
