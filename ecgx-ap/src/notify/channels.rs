//! Delivery channel implementations
//!
//! Email, SMS, and push deliver through configured webhook gateways; a
//! channel with no gateway URL is unavailable and filtered out before
//! dispatch. In-app delivery is the notification row itself.

use crate::models::{ChannelKind, Notification, ValidatorProfile};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Channel delivery failure
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel not configured")]
    Unavailable,
    #[error("gateway error: {0}")]
    Gateway(String),
}

/// One outbound delivery channel
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel can deliver at all (gateway configured)
    fn is_available(&self) -> bool;

    /// Deliver one notification to one recipient
    async fn deliver(
        &self,
        notification: &Notification,
        recipient: &ValidatorProfile,
    ) -> Result<(), ChannelError>;
}

/// In-app channel: the persisted notification row is the delivery
pub struct InAppChannel;

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn deliver(
        &self,
        _notification: &Notification,
        _recipient: &ValidatorProfile,
    ) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Webhook-backed channel (email, SMS, push gateways)
pub struct WebhookChannel {
    kind: ChannelKind,
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind, url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { kind, url, client }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.url.is_some()
    }

    async fn deliver(
        &self,
        notification: &Notification,
        recipient: &ValidatorProfile,
    ) -> Result<(), ChannelError> {
        let url = self.url.as_ref().ok_or(ChannelError::Unavailable)?;

        let payload = serde_json::json!({
            "channel": self.kind.as_str(),
            "recipient_id": notification.recipient_id,
            "recipient_name": recipient.name,
            "title": notification.title,
            "message": notification.message,
            "priority": notification.priority.as_str(),
            "notification_type": notification.notification_type.as_str(),
            "analysis_id": notification.analysis_id,
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Gateway(format!(
                "gateway returned {}",
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}
