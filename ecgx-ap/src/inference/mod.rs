//! Inference gateway
//!
//! Fans one preprocessed signal out to every configured model, fan-in
//! bounded by an overall deadline. Model calls are isolated: one model
//! failing, timing out, or returning low confidence never aborts the run.
//! The run as a whole fails only when nothing usable remains.

mod http_model;

pub use http_model::HttpModelClient;

use crate::types::{
    DiagnosticResult, EcgSignal, InferenceError, InferenceModel, ModelRejection,
    RecordingMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Gateway output: usable results plus the audit trail of exclusions
#[derive(Debug)]
pub struct GatewayOutput {
    /// Per-model diagnostic results that passed validation and the
    /// confidence floor
    pub results: HashMap<String, DiagnosticResult>,
    /// Per-model exclusions (failures, low confidence, deadline)
    pub rejections: HashMap<String, ModelRejection>,
}

/// Inference gateway over a fixed model set
pub struct InferenceGateway {
    models: Vec<Arc<dyn InferenceModel>>,
    deadline: Duration,
    min_confidence: f64,
}

impl InferenceGateway {
    pub fn new(
        models: Vec<Arc<dyn InferenceModel>>,
        deadline: Duration,
        min_confidence: f64,
    ) -> Self {
        Self {
            models,
            deadline,
            min_confidence,
        }
    }

    /// Run all models concurrently against the signal
    ///
    /// # Errors
    /// - `AllModelsFailed` when every model call failed or timed out
    /// - `NoUsableOutput` when models ran but nothing survived the
    ///   confidence floor
    pub async fn infer(
        &self,
        signal: &EcgSignal,
        metadata: &RecordingMetadata,
    ) -> Result<GatewayOutput, InferenceError> {
        if self.models.is_empty() {
            tracing::error!("Inference requested with no models configured");
            return Err(InferenceError::AllModelsFailed);
        }

        let mut join_set = JoinSet::new();
        for model in &self.models {
            let model = Arc::clone(model);
            let signal = signal.clone();
            let metadata = metadata.clone();
            join_set.spawn(async move {
                let name = model.name().to_string();
                let outcome = model.infer(&signal, &metadata).await;
                (name, outcome)
            });
        }

        let mut results: HashMap<String, DiagnosticResult> = HashMap::new();
        let mut rejections: HashMap<String, ModelRejection> = HashMap::new();

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    match joined {
                        None => break,
                        Some(Err(join_err)) => {
                            // A panicking model task is isolated like any
                            // other model failure
                            tracing::error!(error = %join_err, "Model task panicked");
                        }
                        Some(Ok((name, outcome))) => {
                            self.record_outcome(name, outcome, &mut results, &mut rejections);
                        }
                    }
                }
                _ = &mut deadline => {
                    let outstanding = join_set.len();
                    tracing::warn!(
                        outstanding,
                        deadline_secs = self.deadline.as_secs(),
                        "Inference deadline expired, cancelling outstanding model calls"
                    );
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok((name, outcome)) = joined {
                            // Calls that finished before the abort landed
                            // still count
                            self.record_outcome(name, outcome, &mut results, &mut rejections);
                        }
                    }
                    for model in &self.models {
                        let name = model.name().to_string();
                        if !results.contains_key(&name) && !rejections.contains_key(&name) {
                            rejections.insert(name, ModelRejection::DeadlineExpired);
                        }
                    }
                    break;
                }
            }
        }

        if results.is_empty() {
            let any_ran = rejections
                .values()
                .any(|r| matches!(r, ModelRejection::LowConfidence { .. }));
            return if any_ran {
                tracing::warn!("All model results excluded by confidence floor");
                Err(InferenceError::NoUsableOutput)
            } else {
                tracing::error!(models = self.models.len(), "All models failed");
                Err(InferenceError::AllModelsFailed)
            };
        }

        tracing::info!(
            usable = results.len(),
            excluded = rejections.len(),
            "Inference fan-out complete"
        );

        Ok(GatewayOutput {
            results,
            rejections,
        })
    }

    fn record_outcome(
        &self,
        name: String,
        outcome: Result<DiagnosticResult, crate::types::ModelError>,
        results: &mut HashMap<String, DiagnosticResult>,
        rejections: &mut HashMap<String, ModelRejection>,
    ) {
        match outcome {
            Ok(result) => {
                if let Err(reason) = validate_result(&result) {
                    tracing::warn!(model = %name, reason = %reason, "Model output rejected at boundary");
                    rejections.insert(name, ModelRejection::Failed(reason));
                    return;
                }
                if result.confidence < self.min_confidence {
                    tracing::warn!(
                        model = %name,
                        confidence = result.confidence,
                        minimum = self.min_confidence,
                        "Model result below confidence floor, excluded"
                    );
                    rejections.insert(
                        name,
                        ModelRejection::LowConfidence {
                            confidence: result.confidence,
                            minimum: self.min_confidence,
                        },
                    );
                    return;
                }
                tracing::debug!(
                    model = %name,
                    diagnosis = %result.primary_diagnosis,
                    confidence = result.confidence,
                    "Model result accepted"
                );
                results.insert(name, result);
            }
            Err(err) => {
                tracing::warn!(model = %name, error = %err, "Model call failed, excluded");
                rejections.insert(name, ModelRejection::Failed(err.to_string()));
            }
        }
    }
}

/// Typed-boundary validation of a model response
///
/// Required fields must be present and in range before the result may
/// participate in consolidation.
fn validate_result(result: &DiagnosticResult) -> Result<(), String> {
    if result.primary_diagnosis.trim().is_empty() {
        return Err("empty primary diagnosis".into());
    }
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err(format!("confidence {} out of range", result.confidence));
    }
    if result.model_name.trim().is_empty() {
        return Err("missing model name".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelError;
    use async_trait::async_trait;

    struct FixedModel {
        name: String,
        result: Result<DiagnosticResult, String>,
        delay: Duration,
    }

    #[async_trait]
    impl InferenceModel for FixedModel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn infer(
            &self,
            _signal: &EcgSignal,
            _metadata: &RecordingMetadata,
        ) -> Result<DiagnosticResult, ModelError> {
            tokio::time::sleep(self.delay).await;
            self.result
                .clone()
                .map_err(ModelError::Internal)
        }
    }

    fn diag(model: &str, diagnosis: &str, confidence: f64) -> DiagnosticResult {
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
            processing_time_ms: 10,
            model_name: model.to_string(),
            model_version: "test".to_string(),
        }
    }

    fn test_signal() -> (EcgSignal, RecordingMetadata) {
        let signal = EcgSignal {
            sample_rate: 500,
            lead_names: vec!["II".into()],
            leads: vec![vec![0.0; 500]],
        };
        let metadata = RecordingMetadata {
            sample_rate: 500,
            duration_secs: 1.0,
            lead_count: 1,
            lead_names: vec!["II".into()],
            sample_count: 500,
            device: None,
            content_hash: "t".into(),
            file_size: 0,
        };
        (signal, metadata)
    }

    fn gateway(models: Vec<Arc<dyn InferenceModel>>) -> InferenceGateway {
        InferenceGateway::new(models, Duration::from_secs(5), 0.7)
    }

    #[tokio::test]
    async fn failing_model_is_isolated() {
        let (signal, metadata) = test_signal();
        let gw = gateway(vec![
            Arc::new(FixedModel {
                name: "good".into(),
                result: Ok(diag("good", "Normal", 0.9)),
                delay: Duration::ZERO,
            }),
            Arc::new(FixedModel {
                name: "bad".into(),
                result: Err("model exploded".into()),
                delay: Duration::ZERO,
            }),
        ]);

        let out = gw.infer(&signal, &metadata).await.unwrap();
        assert_eq!(out.results.len(), 1);
        assert!(out.results.contains_key("good"));
        assert!(matches!(
            out.rejections.get("bad"),
            Some(ModelRejection::Failed(_))
        ));
    }

    #[tokio::test]
    async fn all_models_failed() {
        let (signal, metadata) = test_signal();
        let gw = gateway(vec![Arc::new(FixedModel {
            name: "only".into(),
            result: Err("down".into()),
            delay: Duration::ZERO,
        })]);

        let err = gw.infer(&signal, &metadata).await.unwrap_err();
        assert!(matches!(err, InferenceError::AllModelsFailed));
    }

    #[tokio::test]
    async fn low_confidence_excluded_and_empties_to_no_usable_output() {
        let (signal, metadata) = test_signal();
        let gw = gateway(vec![Arc::new(FixedModel {
            name: "meek".into(),
            result: Ok(diag("meek", "Normal", 0.4)),
            delay: Duration::ZERO,
        })]);

        let err = gw.infer(&signal, &metadata).await.unwrap_err();
        assert!(matches!(err, InferenceError::NoUsableOutput));
    }

    #[tokio::test]
    async fn deadline_proceeds_with_completed_results() {
        let (signal, metadata) = test_signal();
        let gw = InferenceGateway::new(
            vec![
                Arc::new(FixedModel {
                    name: "fast".into(),
                    result: Ok(diag("fast", "Normal", 0.9)),
                    delay: Duration::ZERO,
                }),
                Arc::new(FixedModel {
                    name: "slow".into(),
                    result: Ok(diag("slow", "Normal", 0.95)),
                    delay: Duration::from_secs(30),
                }),
            ],
            Duration::from_millis(200),
            0.7,
        );

        let out = gw.infer(&signal, &metadata).await.unwrap();
        assert!(out.results.contains_key("fast"));
        assert!(matches!(
            out.rejections.get("slow"),
            Some(ModelRejection::DeadlineExpired)
        ));
    }

    #[tokio::test]
    async fn invalid_output_rejected_at_boundary() {
        let (signal, metadata) = test_signal();
        let gw = gateway(vec![
            Arc::new(FixedModel {
                name: "blank".into(),
                result: Ok(diag("blank", "", 0.9)),
                delay: Duration::ZERO,
            }),
            Arc::new(FixedModel {
                name: "good".into(),
                result: Ok(diag("good", "Normal", 0.9)),
                delay: Duration::ZERO,
            }),
        ]);

        let out = gw.infer(&signal, &metadata).await.unwrap();
        assert_eq!(out.results.len(), 1);
        assert!(matches!(
            out.rejections.get("blank"),
            Some(ModelRejection::Failed(_))
        ));
    }
}
