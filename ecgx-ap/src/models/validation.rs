//! Human validation of an automated analysis
//!
//! A validation progresses PENDING → {APPROVED | REJECTED}; both outcomes
//! are terminal. Re-validation creates a new row once the prior one is
//! terminal; a second concurrent PENDING validation by the same validator
//! for the same analysis is a conflict, enforced in the workflow layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Approved => "APPROVED",
            ValidationStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ValidationStatus::Pending),
            "APPROVED" => Some(ValidationStatus::Approved),
            "REJECTED" => Some(ValidationStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ValidationStatus::Pending)
    }
}

/// Structured review posted by the validator at submission time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReview {
    pub approved: bool,
    #[serde(default)]
    pub clinical_notes: Option<String>,
    /// Whether the validator agrees with the AI primary diagnosis
    #[serde(default)]
    pub agrees_with_ai: Option<bool>,
    /// Signal quality rating, 1–5
    #[serde(default)]
    pub signal_quality_rating: Option<u8>,
    /// AI interpretation quality rating, 1–5
    #[serde(default)]
    pub interpretation_quality_rating: Option<u8>,
}

/// One validation task (one or more per analysis; re-validation permitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub guid: Uuid,
    pub analysis_id: Uuid,
    pub validator_id: Uuid,
    pub status: ValidationStatus,
    pub clinical_notes: Option<String>,
    pub agrees_with_ai: Option<bool>,
    pub signal_quality_rating: Option<u8>,
    pub interpretation_quality_rating: Option<u8>,
    /// Set at creation when a below-senior validator takes a critical analysis
    pub requires_second_opinion: bool,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Validation {
    /// Create a new PENDING validation
    pub fn new(analysis_id: Uuid, validator_id: Uuid, requires_second_opinion: bool) -> Self {
        Self {
            guid: Uuid::new_v4(),
            analysis_id,
            validator_id,
            status: ValidationStatus::Pending,
            clinical_notes: None,
            agrees_with_ai: None,
            signal_quality_rating: None,
            interpretation_quality_rating: None,
            requires_second_opinion,
            created_at: Utc::now(),
            submitted_at: None,
        }
    }

    /// Apply a submitted review, transitioning to the terminal status
    pub fn apply_review(&mut self, review: &ValidationReview) {
        self.status = if review.approved {
            ValidationStatus::Approved
        } else {
            ValidationStatus::Rejected
        };
        self.clinical_notes = review.clinical_notes.clone();
        self.agrees_with_ai = review.agrees_with_ai;
        self.signal_quality_rating = review.signal_quality_rating;
        self.interpretation_quality_rating = review.interpretation_quality_rating;
        self.submitted_at = Some(Utc::now());
    }
}
