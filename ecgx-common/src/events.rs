//! Event types for the ECGX event system
//!
//! Provides shared event definitions and EventBus for all ECGX services.
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission to monitoring UIs.

use crate::urgency::ClinicalUrgency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// ECGX event types
///
/// All pipeline and workflow lifecycle transitions use this central enum
/// for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EcgEvent {
    /// Analysis record created; processing not yet started
    AnalysisSubmitted {
        analysis_id: Uuid,
        patient_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Background task picked up the analysis (PENDING → PROCESSING)
    AnalysisStarted {
        analysis_id: Uuid,
        /// 1-based attempt number (1 for the first run, 2+ for retries)
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// Analysis reached COMPLETED with clinical outputs persisted
    AnalysisCompleted {
        analysis_id: Uuid,
        primary_diagnosis: String,
        urgency: ClinicalUrgency,
        confidence: f64,
        processing_duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A processing run failed; a retry is scheduled after cooldown
    AnalysisRetryScheduled {
        analysis_id: Uuid,
        retry_count: u32,
        cooldown_secs: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Analysis is terminally FAILED (retries exhausted or fatal input error)
    AnalysisFailed {
        analysis_id: Uuid,
        retry_count: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Signal quality fell below the alert threshold (non-blocking)
    QualityIssueDetected {
        analysis_id: Uuid,
        overall_score: f64,
        artifacts: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A validation task was created for a completed analysis
    ValidationCreated {
        validation_id: Uuid,
        analysis_id: Uuid,
        validator_id: Uuid,
        urgent: bool,
        requires_second_opinion: bool,
        timestamp: DateTime<Utc>,
    },

    /// A validator submitted their review (PENDING → APPROVED/REJECTED)
    ValidationSubmitted {
        validation_id: Uuid,
        analysis_id: Uuid,
        validator_id: Uuid,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// No capable validator was available for a critical analysis;
    /// administrators have been alerted
    EscalationRaised {
        analysis_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A notification finished its dispatch pass (sent_at set)
    NotificationDispatched {
        notification_id: Uuid,
        recipient_id: Uuid,
        channels_attempted: Vec<String>,
        channels_failed: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus shared by the pipeline and the SSE endpoint
///
/// Thin wrapper around `tokio::sync::broadcast`; emitting never blocks and
/// drops events for slow subscribers rather than stalling the pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EcgEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EcgEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    ///
    /// Returns the number of subscribers that received the event.
    /// Zero subscribers is not an error.
    pub fn emit(&self, event: EcgEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Channel capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        let delivered = bus.emit(EcgEvent::AnalysisSubmitted {
            analysis_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let analysis_id = Uuid::new_v4();
        bus.emit(EcgEvent::AnalysisStarted {
            analysis_id,
            attempt: 1,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            EcgEvent::AnalysisStarted { analysis_id: id, attempt, .. } => {
                assert_eq!(id, analysis_id);
                assert_eq!(attempt, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EcgEvent::EscalationRaised {
            analysis_id: Uuid::new_v4(),
            reason: "no validator available".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EscalationRaised");
    }
}
