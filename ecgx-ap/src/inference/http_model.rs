//! HTTP inference model client
//!
//! Talks to a deployed model service over JSON. The wire contract is a
//! single POST `/infer` whose response body is a `DiagnosticResult`;
//! required-field validation happens in the gateway, this client only
//! handles transport and deserialization.

use crate::types::{DiagnosticResult, EcgSignal, InferenceModel, ModelError, RecordingMetadata};
use serde::Serialize;
use std::time::Duration;

const USER_AGENT: &str = concat!("ecgx-ap/", env!("CARGO_PKG_VERSION"));

/// Request body sent to the model service
#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    sample_rate: u32,
    lead_names: &'a [String],
    /// Preprocessed samples, leads × samples
    leads: &'a [Vec<f32>],
    duration_secs: f64,
}

/// Remote model endpoint client
pub struct HttpModelClient {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpModelClient {
    /// Create a client for one model endpoint
    ///
    /// `request_timeout` should comfortably exceed typical model latency;
    /// the gateway's overall deadline is the hard bound.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl InferenceModel for HttpModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(
        &self,
        signal: &EcgSignal,
        metadata: &RecordingMetadata,
    ) -> Result<DiagnosticResult, ModelError> {
        let url = format!("{}/infer", self.base_url.trim_end_matches('/'));
        let request = InferRequest {
            sample_rate: signal.sample_rate,
            lead_names: &signal.lead_names,
            leads: &signal.leads,
            duration_secs: metadata.duration_secs,
        };

        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{}: {}", status.as_u16(), body)));
        }

        let mut result: DiagnosticResult = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        // Fill in identity/time when the service omits them
        if result.model_name.is_empty() {
            result.model_name = self.name.clone();
        }
        if result.processing_time_ms == 0 {
            result.processing_time_ms = started.elapsed().as_millis() as u64;
        }

        tracing::debug!(
            model = %self.name,
            diagnosis = %result.primary_diagnosis,
            confidence = result.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model inference returned"
        );

        Ok(result)
    }
}
