//! Analysis orchestration
//!
//! Drives one analysis through its whole lifecycle in a background task:
//! claim, load and preprocess the recording, score signal quality, fan out
//! to the model gateway, consolidate, persist the clinical report
//! atomically with the COMPLETED transition, then hand off to the
//! validation workflow. A failed run retries after a cooldown, up to the
//! configured budget; unreadable input fails terminally on the first run.
//! No error ever escapes the spawned task.

use crate::consolidate::{self, Consolidation};
use crate::db;
use crate::db::artifacts::{Annotation, Measurement};
use crate::inference::InferenceGateway;
use crate::models::{
    ChannelKind, ClinicalReport, EcgAnalysis, Notification, NotificationType,
};
use crate::notify::NotificationDispatcher;
use crate::quality::{QualityAnalyzer, QualityReport};
use crate::signal;
use crate::workflow::ValidationWorkflow;
use chrono::Utc;
use ecgx_common::config::PipelineConfig;
use ecgx_common::events::{EcgEvent, EventBus};
use ecgx_common::urgency::NotificationPriority;
use ecgx_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One processing-run failure, split by whether a retry can help
enum RunFailure {
    /// Input is unreadable or malformed; retrying cannot change that
    Fatal(String),
    /// Transient (I/O, models, database); eligible for the retry budget
    Retryable(String),
}

impl RunFailure {
    fn message(&self) -> &str {
        match self {
            RunFailure::Fatal(m) | RunFailure::Retryable(m) => m,
        }
    }
}

/// Pipeline orchestrator shared by the API and background tasks
pub struct AnalysisOrchestrator {
    pool: SqlitePool,
    event_bus: EventBus,
    config: PipelineConfig,
    gateway: Arc<InferenceGateway>,
    quality: QualityAnalyzer,
    workflow: Arc<ValidationWorkflow>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AnalysisOrchestrator {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        config: PipelineConfig,
        gateway: Arc<InferenceGateway>,
        workflow: Arc<ValidationWorkflow>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            pool,
            event_bus,
            config,
            gateway,
            quality: QualityAnalyzer::new(),
            workflow,
            dispatcher,
        }
    }

    /// Create a PENDING analysis for an uploaded recording
    ///
    /// Returns the new record plus the id of an earlier analysis of the
    /// same file for the same patient, when one exists. Duplicates are
    /// accepted; the caller surfaces the warning.
    pub async fn submit(
        &self,
        patient_id: Uuid,
        created_by: Uuid,
        file_path: String,
        filename: String,
    ) -> Result<(EcgAnalysis, Option<Uuid>)> {
        db::directory::load_patient(&self.pool, patient_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("patient {}", patient_id)))?;

        let mut analysis = EcgAnalysis::new(patient_id, created_by, file_path, filename);

        // Hash now so duplicate submissions warn at accept time; an
        // unreadable file is caught (terminally) by the processing run.
        let mut duplicate_of = None;
        if let Ok(bytes) = std::fs::read(Path::new(&analysis.file_path)) {
            analysis.content_hash = format!("{:x}", Sha256::digest(&bytes));
            analysis.file_size = bytes.len() as u64;
            duplicate_of =
                db::analyses::find_by_content_hash(&self.pool, patient_id, &analysis.content_hash)
                    .await?;
        }

        db::analyses::insert_analysis(&self.pool, &analysis).await?;

        tracing::info!(
            analysis_id = %analysis.guid,
            patient_id = %patient_id,
            filename = %analysis.filename,
            duplicate = duplicate_of.is_some(),
            "Analysis submitted"
        );

        self.event_bus.emit(EcgEvent::AnalysisSubmitted {
            analysis_id: analysis.guid,
            patient_id,
            timestamp: Utc::now(),
        });

        Ok((analysis, duplicate_of))
    }

    /// Spawn the background processing task for an analysis
    ///
    /// The task owns the retry loop; its errors are logged, never raised.
    pub fn spawn_processing(self: &Arc<Self>, analysis_id: Uuid) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.process(analysis_id).await;
        });
    }

    /// Run the full retry loop for one analysis
    pub async fn process(&self, analysis_id: Uuid) {
        // Bounded: first run + max_retries requeues
        for _ in 0..=self.config.max_retries {
            let analysis = match db::analyses::load_analysis(&self.pool, analysis_id).await {
                Ok(Some(a)) => a,
                Ok(None) => {
                    tracing::warn!(analysis_id = %analysis_id, "Analysis vanished before processing");
                    return;
                }
                Err(err) => {
                    tracing::error!(analysis_id = %analysis_id, error = %err, "Load before processing failed");
                    return;
                }
            };

            let started_at = Utc::now();
            match db::analyses::begin_processing(&self.pool, analysis_id, started_at).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        analysis_id = %analysis_id,
                        "Analysis not PENDING, another worker owns it"
                    );
                    return;
                }
                Err(err) => {
                    tracing::error!(analysis_id = %analysis_id, error = %err, "Claim failed");
                    return;
                }
            }

            let attempt = analysis.retry_count + 1;
            self.event_bus.emit(EcgEvent::AnalysisStarted {
                analysis_id,
                attempt,
                timestamp: started_at,
            });
            tracing::info!(analysis_id = %analysis_id, attempt, "Processing run started");

            let failure = match self.run_once(&analysis).await {
                Ok(()) => return,
                Err(f) => f,
            };

            tracing::warn!(
                analysis_id = %analysis_id,
                attempt,
                error = %failure.message(),
                "Processing run failed"
            );

            match db::analyses::fail_analysis(
                &self.pool,
                analysis_id,
                failure.message(),
                analysis.retry_count,
            )
            .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(analysis_id = %analysis_id, "Lost FAILED transition, stopping");
                    return;
                }
                Err(err) => {
                    tracing::error!(analysis_id = %analysis_id, error = %err, "Recording failure failed");
                    return;
                }
            }

            let retries_exhausted = analysis.retry_count >= self.config.max_retries;
            if matches!(failure, RunFailure::Fatal(_)) || retries_exhausted {
                self.finalize_failure(analysis_id, analysis.retry_count, failure.message())
                    .await;
                return;
            }

            let next_retry = analysis.retry_count + 1;
            self.event_bus.emit(EcgEvent::AnalysisRetryScheduled {
                analysis_id,
                retry_count: next_retry,
                cooldown_secs: self.config.retry_cooldown_secs,
                error: failure.message().to_string(),
                timestamp: Utc::now(),
            });

            tokio::time::sleep(Duration::from_secs(self.config.retry_cooldown_secs)).await;

            match db::analyses::requeue_failed(&self.pool, analysis_id, next_retry).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(analysis_id = %analysis_id, "Analysis no longer FAILED, stopping retry loop");
                    return;
                }
                Err(err) => {
                    tracing::error!(analysis_id = %analysis_id, error = %err, "Requeue failed");
                    return;
                }
            }
        }
    }

    /// One processing run over a claimed (PROCESSING) analysis
    async fn run_once(&self, analysis: &EcgAnalysis) -> std::result::Result<(), RunFailure> {
        let started = std::time::Instant::now();

        let (ecg, metadata) = signal::load_and_preprocess(Path::new(&analysis.file_path))
            .map_err(|e| {
                if e.is_retryable() {
                    RunFailure::Retryable(e.to_string())
                } else {
                    RunFailure::Fatal(e.to_string())
                }
            })?;

        db::analyses::update_recording_metadata(&self.pool, analysis.guid, &metadata)
            .await
            .map_err(|e| RunFailure::Retryable(e.to_string()))?;

        let quality = self.quality.analyze(&ecg);
        if quality.overall_score < self.config.quality_alert_threshold {
            // Low quality flags the result, it never blocks processing
            self.raise_quality_alert(analysis, &quality).await;
        }

        let output = self
            .gateway
            .infer(&ecg, &metadata)
            .await
            .map_err(|e| RunFailure::Retryable(e.to_string()))?;

        let consolidation = consolidate::consolidate(&output.results)
            .map_err(|e| RunFailure::Retryable(e.to_string()))?;

        let rejections: std::collections::BTreeMap<String, String> = output
            .rejections
            .iter()
            .map(|(name, r)| (name.clone(), r.to_string()))
            .collect();

        let report = build_report(&consolidation, &quality, &output.results, &rejections);

        let completed_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;

        let completed = db::analyses::complete_analysis(
            &self.pool,
            analysis.guid,
            &report,
            completed_at,
            duration_ms,
        )
        .await
        .map_err(|e| RunFailure::Retryable(e.to_string()))?;
        if !completed {
            return Err(RunFailure::Retryable(
                "lost COMPLETED transition to a concurrent writer".into(),
            ));
        }

        if let Err(err) = self.persist_artifacts(analysis.guid, &consolidation).await {
            // The report is already committed; artifact rows are derived data
            tracing::warn!(
                analysis_id = %analysis.guid,
                error = %err,
                "Artifact persistence failed after completion, continuing"
            );
        }

        tracing::info!(
            analysis_id = %analysis.guid,
            diagnosis = %report.primary_diagnosis,
            urgency = %report.clinical_urgency.as_str(),
            confidence = report.ai_confidence,
            duration_ms,
            "Analysis completed"
        );

        self.event_bus.emit(EcgEvent::AnalysisCompleted {
            analysis_id: analysis.guid,
            primary_diagnosis: report.primary_diagnosis.clone(),
            urgency: report.clinical_urgency,
            confidence: report.ai_confidence,
            processing_duration_ms: duration_ms,
            timestamp: completed_at,
        });

        // Hand off to validation before the task returns; assignment
        // problems (including critical escalation) never fail a
        // completed analysis.
        match db::analyses::load_analysis(&self.pool, analysis.guid).await {
            Ok(Some(completed_analysis)) => {
                if let Err(err) = self.workflow.assign_validator(&completed_analysis).await {
                    tracing::warn!(
                        analysis_id = %analysis.guid,
                        error = %err,
                        "Validator assignment failed, continuing"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(analysis_id = %analysis.guid, error = %err, "Reload for validation failed");
            }
        }

        Ok(())
    }

    async fn persist_artifacts(&self, analysis_id: Uuid, c: &Consolidation) -> Result<()> {
        let mut measurements = Vec::new();
        let pairs = [
            ("heart_rate", c.measurements.heart_rate_bpm, "bpm"),
            ("pr_interval", c.measurements.pr_ms, "ms"),
            ("qrs_duration", c.measurements.qrs_ms, "ms"),
            ("qt_interval", c.measurements.qt_ms, "ms"),
            ("qtc_interval", c.measurements.qtc_ms, "ms"),
        ];
        for (name, value, unit) in pairs {
            if let Some(value) = value {
                // Intervals are averaged across models, an algorithmic derivation
                measurements.push(Measurement::new(
                    analysis_id,
                    name,
                    value,
                    unit,
                    "algorithm",
                    c.confidence,
                ));
            }
        }
        db::artifacts::insert_measurements(&self.pool, &measurements).await?;

        // Findings and anomalies come straight from the model ensemble
        let mut annotations = Vec::new();
        for finding in &c.findings {
            let mut ann =
                Annotation::new(analysis_id, "finding", &finding.description, "ai", c.confidence);
            ann.severity = finding.severity.map(|s| s.as_str().to_string());
            annotations.push(ann);
        }
        for anomaly in &c.anomalies {
            let mut ann =
                Annotation::new(analysis_id, "anomaly", &anomaly.description, "ai", c.confidence);
            ann.location = anomaly.location.clone();
            ann.severity = anomaly.severity.map(|s| s.as_str().to_string());
            annotations.push(ann);
        }
        db::artifacts::insert_annotations(&self.pool, &annotations).await?;

        Ok(())
    }

    /// Emit the quality event and notify the submitting user
    async fn raise_quality_alert(&self, analysis: &EcgAnalysis, quality: &QualityReport) {
        tracing::warn!(
            analysis_id = %analysis.guid,
            overall_score = quality.overall_score,
            artifacts = ?quality.artifacts,
            "Signal quality below alert threshold"
        );

        self.event_bus.emit(EcgEvent::QualityIssueDetected {
            analysis_id: analysis.guid,
            overall_score: quality.overall_score,
            artifacts: quality.artifacts.clone(),
            timestamp: Utc::now(),
        });

        let submitter = match db::directory::load_user(&self.pool, analysis.created_by).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "Submitter lookup failed for quality alert");
                return;
            }
        };

        let notification = Notification::new(
            submitter.guid,
            "Low signal quality",
            format!(
                "Analysis {} signal quality {:.2} ({})",
                analysis.guid,
                quality.overall_score,
                quality.artifacts.join(", ")
            ),
            NotificationType::QualityIssue,
            NotificationPriority::Normal,
            vec![ChannelKind::InApp],
        )
        .with_analysis(analysis.guid);

        if let Err(err) = self
            .dispatcher
            .create_and_dispatch(notification, &submitter)
            .await
        {
            tracing::warn!(error = %err, "Quality alert dispatch failed, continuing");
        }
    }

    /// Terminal failure: emit the event and alert the administrators
    async fn finalize_failure(&self, analysis_id: Uuid, retry_count: u32, error: &str) {
        tracing::error!(
            analysis_id = %analysis_id,
            retry_count,
            error,
            "Analysis terminally failed"
        );

        self.event_bus.emit(EcgEvent::AnalysisFailed {
            analysis_id,
            retry_count,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        let admins = match db::directory::administrators(&self.pool).await {
            Ok(admins) => admins,
            Err(err) => {
                tracing::warn!(error = %err, "Administrator lookup failed for failure alert");
                return;
            }
        };

        for admin in &admins {
            let notification = Notification::new(
                admin.guid,
                "Analysis processing failed",
                format!("Analysis {} failed terminally: {}", analysis_id, error),
                NotificationType::SystemAlert,
                NotificationPriority::High,
                vec![ChannelKind::InApp, ChannelKind::Email],
            )
            .with_analysis(analysis_id);

            if let Err(err) = self
                .dispatcher
                .create_and_dispatch(notification, admin)
                .await
            {
                tracing::warn!(
                    recipient_id = %admin.guid,
                    error = %err,
                    "Failure alert dispatch failed, continuing"
                );
            }
        }
    }
}

/// Assemble the persisted clinical report from the pipeline stages
fn build_report(
    c: &Consolidation,
    quality: &QualityReport,
    raw_results: &std::collections::HashMap<String, crate::types::DiagnosticResult>,
    rejections: &std::collections::BTreeMap<String, String>,
) -> ClinicalReport {
    ClinicalReport {
        ai_confidence: c.confidence,
        raw_predictions: serde_json::to_value(raw_results).unwrap_or_default(),
        interpretability: serde_json::json!({
            "agreeing_models": c.agreeing_models,
            "rejections": rejections,
            "ensemble_quality": c.ensemble_quality,
            "interpretation": c.interpretation,
        }),
        heart_rate_bpm: c.measurements.heart_rate_bpm,
        pr_ms: c.measurements.pr_ms,
        qrs_ms: c.measurements.qrs_ms,
        qt_ms: c.measurements.qt_ms,
        qtc_ms: c.measurements.qtc_ms,
        rhythm: c.rhythm.clone(),
        primary_diagnosis: c.primary_diagnosis.clone(),
        secondary_diagnosis: c.secondary_diagnosis.clone(),
        icd10_codes: c.icd10_codes.clone(),
        clinical_urgency: c.urgency,
        requires_immediate_attention: c.requires_immediate_attention,
        recommendations: c.recommendations.clone(),
        findings: c.findings.clone(),
        features: c.features.clone(),
        anomalies: c.anomalies.clone(),
        quality_score: quality.overall_score,
        noise_level: quality.noise_level,
        baseline_wander: quality.baseline_wander,
    }
}
