//! Clinical urgency and notification priority vocabulary
//!
//! Shared across the pipeline, validation workflow, and notification
//! dispatcher so the tiers compare consistently everywhere.

use serde::{Deserialize, Serialize};

/// Clinical urgency tier of a completed analysis
///
/// Drives validator assignment speed and notification channel selection.
/// Ordering matters: `Routine < Urgent < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClinicalUrgency {
    /// No time-critical findings; normal review queue
    Routine,
    /// Findings that warrant prompt review (e.g., infarction patterns)
    Urgent,
    /// Findings that require immediate human attention (e.g., VFib)
    Critical,
}

impl ClinicalUrgency {
    /// String form used in database columns and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicalUrgency::Routine => "ROUTINE",
            ClinicalUrgency::Urgent => "URGENT",
            ClinicalUrgency::Critical => "CRITICAL",
        }
    }

    /// Parse from the database/API string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUTINE" => Some(ClinicalUrgency::Routine),
            "URGENT" => Some(ClinicalUrgency::Urgent),
            "CRITICAL" => Some(ClinicalUrgency::Critical),
            _ => None,
        }
    }
}

/// Notification priority
///
/// Quiet hours suppress every tier below `Critical` on intrusive channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "LOW",
            NotificationPriority::Normal => "NORMAL",
            NotificationPriority::High => "HIGH",
            NotificationPriority::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(NotificationPriority::Low),
            "NORMAL" => Some(NotificationPriority::Normal),
            "HIGH" => Some(NotificationPriority::High),
            "CRITICAL" => Some(NotificationPriority::Critical),
            _ => None,
        }
    }
}
