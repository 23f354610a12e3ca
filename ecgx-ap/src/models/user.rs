//! Read-only directory records: validators and patients
//!
//! The user/patient directory is an external collaborator; the pipeline
//! only reads role, experience, availability, and notification preferences.

use crate::models::{ChannelKind, NotificationType};
use chrono::{NaiveTime, Timelike};
use ecgx_common::ClinicalUrgency;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clinical role of a directory user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Administrator,
    Cardiologist,
    Physician,
    Technician,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Administrator => "administrator",
            UserRole::Cardiologist => "cardiologist",
            UserRole::Physician => "physician",
            UserRole::Technician => "technician",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "administrator" => Some(UserRole::Administrator),
            "cardiologist" => Some(UserRole::Cardiologist),
            "physician" => Some(UserRole::Physician),
            "technician" => Some(UserRole::Technician),
            _ => None,
        }
    }

    /// Roles permitted to validate analyses at all
    pub fn can_validate(&self) -> bool {
        matches!(self, UserRole::Cardiologist | UserRole::Physician)
    }
}

/// Per-user quiet hours window in local time ("HH:MM"–"HH:MM")
///
/// Windows may wrap past midnight (e.g., 22:00–07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Parse from "HH:MM" strings as stored in the directory
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let parse_hm = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").ok();
        Some(Self {
            start: parse_hm(start)?,
            end: parse_hm(end)?,
        })
    }

    /// Whether `time` falls inside the window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Wraps past midnight
            time >= self.start || time < self.end
        }
    }

    /// Storage form
    pub fn to_strings(&self) -> (String, String) {
        (
            format!("{:02}:{:02}", self.start.hour(), self.start.minute()),
            format!("{:02}:{:02}", self.end.hour(), self.end.minute()),
        )
    }
}

/// Directory profile of a potential validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorProfile {
    pub guid: Uuid,
    pub name: String,
    pub role: UserRole,
    pub years_experience: u32,
    /// Currently accepting validation assignments
    pub available: bool,
    /// Enabled delivery channels (preference filter applied at dispatch)
    pub enabled_channels: Vec<ChannelKind>,
    pub quiet_hours: Option<QuietHours>,
}

impl ValidatorProfile {
    /// Whether this validator may validate an analysis of the given urgency
    ///
    /// CRITICAL requires a physician or cardiologist with senior experience;
    /// URGENT requires any validating role; ROUTINE additionally allows
    /// junior validators.
    pub fn can_validate(&self, urgency: ClinicalUrgency, senior_years: u32) -> bool {
        if !self.role.can_validate() {
            return false;
        }
        match urgency {
            ClinicalUrgency::Critical => self.years_experience >= senior_years,
            ClinicalUrgency::Urgent | ClinicalUrgency::Routine => true,
        }
    }

    /// Whether this validator is senior (no second opinion required on
    /// critical analyses)
    pub fn is_senior(&self, senior_years: u32) -> bool {
        self.role == UserRole::Cardiologist && self.years_experience >= senior_years
    }

    /// Whether a channel is enabled for the given notification type
    ///
    /// Urgent alerts ignore channel preferences: a critical finding must
    /// never fail to notify a human because of a muted channel.
    pub fn channel_enabled(&self, channel: ChannelKind, nt: NotificationType) -> bool {
        if nt == NotificationType::UrgentAlert {
            return true;
        }
        self.enabled_channels.contains(&channel)
    }
}

/// Directory patient record (age/context lookups only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub guid: Uuid,
    pub name: String,
    pub birth_date: Option<chrono::NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: UserRole, years: u32) -> ValidatorProfile {
        ValidatorProfile {
            guid: Uuid::new_v4(),
            name: "Dr. Test".into(),
            role,
            years_experience: years,
            available: true,
            enabled_channels: vec![ChannelKind::InApp, ChannelKind::Email],
            quiet_hours: None,
        }
    }

    #[test]
    fn critical_requires_senior_experience() {
        assert!(profile(UserRole::Cardiologist, 8).can_validate(ClinicalUrgency::Critical, 5));
        assert!(profile(UserRole::Physician, 6).can_validate(ClinicalUrgency::Critical, 5));
        assert!(!profile(UserRole::Physician, 2).can_validate(ClinicalUrgency::Critical, 5));
        assert!(!profile(UserRole::Technician, 20).can_validate(ClinicalUrgency::Critical, 5));
    }

    #[test]
    fn routine_allows_junior_validators() {
        assert!(profile(UserRole::Physician, 1).can_validate(ClinicalUrgency::Routine, 5));
        assert!(!profile(UserRole::Administrator, 10).can_validate(ClinicalUrgency::Routine, 5));
    }

    #[test]
    fn quiet_hours_wrap_past_midnight() {
        let qh = QuietHours::parse("22:00", "07:00").unwrap();
        assert!(qh.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(qh.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!qh.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));

        let daytime = QuietHours::parse("13:00", "14:00").unwrap();
        assert!(daytime.contains(NaiveTime::from_hms_opt(13, 30, 0).unwrap()));
        assert!(!daytime.contains(NaiveTime::from_hms_opt(14, 0, 0).unwrap()));
    }

    #[test]
    fn urgent_alerts_bypass_channel_preferences() {
        let p = profile(UserRole::Cardiologist, 10);
        assert!(!p.channel_enabled(ChannelKind::Sms, NotificationType::QualityIssue));
        assert!(p.channel_enabled(ChannelKind::Sms, NotificationType::UrgentAlert));
    }
}
