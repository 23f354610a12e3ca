//! Notification event record
//!
//! Ephemeral per-recipient record with per-channel delivery flags and
//! errors. A notification whose `expires_at` is past is never (re)sent;
//! dispatch attempts are capped by `max_retries`.

use chrono::{DateTime, Utc};
use ecgx_common::urgency::NotificationPriority;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    InApp,
    Email,
    Sms,
    Push,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::InApp => "inapp",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inapp" => Some(ChannelKind::InApp),
            "email" => Some(ChannelKind::Email),
            "sms" => Some(ChannelKind::Sms),
            "push" => Some(ChannelKind::Push),
            _ => None,
        }
    }
}

/// Notification type, used for recipient preference filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A validation task was assigned to the recipient
    ValidationAssigned,
    /// Critical analysis requires immediate attention
    UrgentAlert,
    /// An analysis the recipient follows reached a terminal state
    AnalysisComplete,
    /// Low signal quality detected on an analysis
    QualityIssue,
    /// Operational alert (retry exhaustion, escalation)
    SystemAlert,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ValidationAssigned => "validation_assigned",
            NotificationType::UrgentAlert => "urgent_alert",
            NotificationType::AnalysisComplete => "analysis_complete",
            NotificationType::QualityIssue => "quality_issue",
            NotificationType::SystemAlert => "system_alert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation_assigned" => Some(NotificationType::ValidationAssigned),
            "urgent_alert" => Some(NotificationType::UrgentAlert),
            "analysis_complete" => Some(NotificationType::AnalysisComplete),
            "quality_issue" => Some(NotificationType::QualityIssue),
            "system_alert" => Some(NotificationType::SystemAlert),
            _ => None,
        }
    }
}

/// Per-channel delivery state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub attempted: bool,
    pub delivered: bool,
    pub error: Option<String>,
}

/// One notification record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub guid: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    /// Channels requested by the producer (further filtered at dispatch)
    pub requested_channels: Vec<ChannelKind>,
    /// Related analysis, when applicable
    pub analysis_id: Option<Uuid>,

    pub email: ChannelDelivery,
    pub sms: ChannelDelivery,
    pub push: ChannelDelivery,
    pub in_app: ChannelDelivery,

    /// Set once a dispatch pass delivered on at least one channel;
    /// all-channels-failed passes leave it unset for the retry sweep
    pub sent_at: Option<DateTime<Utc>>,
    /// Recipient opened/read marker (in-app)
    pub read_at: Option<DateTime<Utc>>,
    /// Earliest dispatch time; None = immediately
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Hard expiry; never (re)sent after this instant
    pub expires_at: Option<DateTime<Utc>>,
    /// Completed dispatch passes where every channel failed
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
        priority: NotificationPriority,
        requested_channels: Vec<ChannelKind>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            recipient_id,
            title: title.into(),
            message: message.into(),
            notification_type,
            priority,
            requested_channels,
            analysis_id: None,
            email: ChannelDelivery::default(),
            sms: ChannelDelivery::default(),
            push: ChannelDelivery::default(),
            in_app: ChannelDelivery::default(),
            sent_at: None,
            read_at: None,
            scheduled_for: None,
            expires_at: None,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
        }
    }

    pub fn with_analysis(mut self, analysis_id: Uuid) -> Self {
        self.analysis_id = Some(analysis_id);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this notification is expired as of `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    /// Mutable delivery slot for a channel
    pub fn delivery_mut(&mut self, channel: ChannelKind) -> &mut ChannelDelivery {
        match channel {
            ChannelKind::Email => &mut self.email,
            ChannelKind::Sms => &mut self.sms,
            ChannelKind::Push => &mut self.push,
            ChannelKind::InApp => &mut self.in_app,
        }
    }

    /// Delivery slot for a channel
    pub fn delivery(&self, channel: ChannelKind) -> &ChannelDelivery {
        match channel {
            ChannelKind::Email => &self.email,
            ChannelKind::Sms => &self.sms,
            ChannelKind::Push => &self.push,
            ChannelKind::InApp => &self.in_app,
        }
    }

    /// True when at least one attempted channel delivered
    pub fn any_delivered(&self) -> bool {
        [&self.email, &self.sms, &self.push, &self.in_app]
            .iter()
            .any(|d| d.delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let mut n = Notification::new(
            Uuid::new_v4(),
            "t",
            "m",
            NotificationType::SystemAlert,
            NotificationPriority::Normal,
            vec![ChannelKind::InApp],
        );
        assert!(!n.is_expired(now));
        n.expires_at = Some(now - Duration::seconds(1));
        assert!(n.is_expired(now));
    }

    #[test]
    fn channel_slots_are_independent() {
        let mut n = Notification::new(
            Uuid::new_v4(),
            "t",
            "m",
            NotificationType::UrgentAlert,
            NotificationPriority::Critical,
            vec![ChannelKind::Email, ChannelKind::Sms],
        );
        n.delivery_mut(ChannelKind::Email).attempted = true;
        n.delivery_mut(ChannelKind::Email).error = Some("smtp refused".into());
        n.delivery_mut(ChannelKind::Sms).attempted = true;
        n.delivery_mut(ChannelKind::Sms).delivered = true;

        assert!(n.delivery(ChannelKind::Email).error.is_some());
        assert!(!n.delivery(ChannelKind::Email).delivered);
        assert!(n.delivery(ChannelKind::Sms).delivered);
        assert!(n.any_delivered());
    }
}
