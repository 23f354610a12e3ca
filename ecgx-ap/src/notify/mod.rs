//! Notification dispatch
//!
//! One dispatch pass per notification: filter the requested channels
//! against recipient preferences, channel availability, and quiet hours,
//! then attempt each surviving channel independently. A failed channel
//! records its error and never blocks the others. A pass where every
//! channel failed leaves the notification unsent and bumps `retry_count`
//! so the periodic sweep picks it up again, up to `max_retries`.

mod channels;

pub use channels::{ChannelError, InAppChannel, NotificationChannel, WebhookChannel};

use crate::db;
use crate::models::{ChannelKind, Notification, ValidatorProfile};
use chrono::Utc;
use ecgx_common::config::ChannelConfig;
use ecgx_common::events::{EcgEvent, EventBus};
use ecgx_common::urgency::NotificationPriority;
use ecgx_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Notification dispatcher over a fixed channel set
pub struct NotificationDispatcher {
    pool: SqlitePool,
    channels: Vec<Arc<dyn NotificationChannel>>,
    event_bus: EventBus,
}

impl NotificationDispatcher {
    pub fn new(
        pool: SqlitePool,
        channels: Vec<Arc<dyn NotificationChannel>>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            channels,
            event_bus,
        }
    }

    /// Dispatcher with the standard channel set built from config
    pub fn from_config(pool: SqlitePool, config: &ChannelConfig, event_bus: EventBus) -> Self {
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(InAppChannel),
            Arc::new(WebhookChannel::new(
                ChannelKind::Email,
                config.email_webhook.clone(),
            )),
            Arc::new(WebhookChannel::new(
                ChannelKind::Sms,
                config.sms_webhook.clone(),
            )),
            Arc::new(WebhookChannel::new(
                ChannelKind::Push,
                config.push_webhook.clone(),
            )),
        ];
        Self::new(pool, channels, event_bus)
    }

    /// Persist and dispatch a new notification
    pub async fn create_and_dispatch(
        &self,
        mut notification: Notification,
        recipient: &ValidatorProfile,
    ) -> Result<Notification> {
        db::notifications::insert_notification(&self.pool, &notification).await?;
        self.dispatch(&mut notification, recipient).await?;
        Ok(notification)
    }

    /// Run one dispatch pass over an already-persisted notification
    pub async fn dispatch(
        &self,
        notification: &mut Notification,
        recipient: &ValidatorProfile,
    ) -> Result<()> {
        let now = Utc::now();

        // Expired notifications are never sent, not even partially
        if notification.is_expired(now) {
            tracing::debug!(
                notification_id = %notification.guid,
                "Notification expired before dispatch, skipping"
            );
            return Ok(());
        }

        let selected = self.select_channels(notification, recipient, now);
        if selected.is_empty() {
            // Nothing deliverable at all; the in-app row remains visible
            tracing::warn!(
                notification_id = %notification.guid,
                "No deliverable channels after filtering"
            );
        }

        let mut attempted: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut any_delivered = false;

        for channel in &selected {
            let name = channel.kind().as_str().to_string();
            attempted.push(name.clone());

            let slot = notification.delivery_mut(channel.kind());
            slot.attempted = true;

            match channel.deliver(notification, recipient).await {
                Ok(()) => {
                    notification.delivery_mut(channel.kind()).delivered = true;
                    any_delivered = true;
                }
                Err(err) => {
                    // Channel failure is isolated: record and continue
                    tracing::warn!(
                        notification_id = %notification.guid,
                        channel = %name,
                        error = %err,
                        "Channel delivery failed, continuing with remaining channels"
                    );
                    notification.delivery_mut(channel.kind()).error = Some(err.to_string());
                    failed.push(name);
                }
            }
        }

        if any_delivered {
            notification.sent_at = Some(now);
        } else if !selected.is_empty() {
            notification.retry_count += 1;
        }

        db::notifications::update_dispatch_outcome(&self.pool, notification).await?;

        self.event_bus.emit(EcgEvent::NotificationDispatched {
            notification_id: notification.guid,
            recipient_id: notification.recipient_id,
            channels_attempted: attempted,
            channels_failed: failed,
            timestamp: now,
        });

        Ok(())
    }

    /// Requested ∩ preference-enabled ∩ available, with the quiet-hours law
    ///
    /// During the recipient's quiet hours anything below CRITICAL priority
    /// is downgraded to in-app only; CRITICAL keeps its full channel set.
    fn select_channels(
        &self,
        notification: &Notification,
        recipient: &ValidatorProfile,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<Arc<dyn NotificationChannel>> {
        let in_quiet_hours = recipient
            .quiet_hours
            .map(|qh| qh.contains(now.time()))
            .unwrap_or(false);

        self.channels
            .iter()
            .filter(|c| notification.requested_channels.contains(&c.kind()))
            .filter(|c| recipient.channel_enabled(c.kind(), notification.notification_type))
            .filter(|c| c.is_available())
            .filter(|c| {
                !(in_quiet_hours
                    && c.kind() != ChannelKind::InApp
                    && notification.priority < NotificationPriority::Critical)
            })
            .cloned()
            .collect()
    }

    /// One retry sweep: re-dispatch everything still due
    ///
    /// Per-notification isolation; a recipient that vanished from the
    /// directory is logged and skipped.
    pub async fn run_retry_sweep(&self) -> Result<usize> {
        let due = db::notifications::due_for_dispatch(&self.pool, Utc::now()).await?;
        let mut dispatched = 0usize;

        for mut notification in due {
            let recipient =
                match db::directory::load_user(&self.pool, notification.recipient_id).await? {
                    Some(r) => r,
                    None => {
                        tracing::warn!(
                            notification_id = %notification.guid,
                            recipient_id = %notification.recipient_id,
                            "Recipient not in directory, skipping"
                        );
                        continue;
                    }
                };

            if let Err(err) = self.dispatch(&mut notification, &recipient).await {
                tracing::warn!(
                    notification_id = %notification.guid,
                    error = %err,
                    "Dispatch failed during sweep, continuing"
                );
                continue;
            }
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::info!(dispatched, "Notification retry sweep complete");
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::{NotificationType, QuietHours, UserRole};
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    /// Scriptable channel for dispatch tests
    struct ScriptedChannel {
        kind: ChannelKind,
        fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn deliver(
            &self,
            _n: &Notification,
            _r: &ValidatorProfile,
        ) -> std::result::Result<(), ChannelError> {
            if self.fail {
                Err(ChannelError::Gateway("scripted failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn recipient(quiet_hours: Option<QuietHours>) -> ValidatorProfile {
        ValidatorProfile {
            guid: Uuid::new_v4(),
            name: "Dr. Recipient".into(),
            role: UserRole::Cardiologist,
            years_experience: 10,
            available: true,
            enabled_channels: vec![
                ChannelKind::InApp,
                ChannelKind::Email,
                ChannelKind::Sms,
                ChannelKind::Push,
            ],
            quiet_hours,
        }
    }

    fn notification(
        recipient_id: Uuid,
        priority: NotificationPriority,
        channels: Vec<ChannelKind>,
    ) -> Notification {
        Notification::new(
            recipient_id,
            "Review needed",
            "An analysis awaits review",
            NotificationType::ValidationAssigned,
            priority,
            channels,
        )
    }

    async fn dispatcher(
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> (NotificationDispatcher, SqlitePool) {
        let pool = init_memory_pool().await.unwrap();
        let d = NotificationDispatcher::new(pool.clone(), channels, EventBus::new(16));
        (d, pool)
    }

    #[tokio::test]
    async fn failed_channel_does_not_block_others() {
        let (d, pool) = dispatcher(vec![
            Arc::new(ScriptedChannel {
                kind: ChannelKind::Email,
                fail: true,
            }),
            Arc::new(ScriptedChannel {
                kind: ChannelKind::InApp,
                fail: false,
            }),
        ])
        .await;
        let r = recipient(None);
        let n = notification(
            r.guid,
            NotificationPriority::Normal,
            vec![ChannelKind::Email, ChannelKind::InApp],
        );

        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert!(n.sent_at.is_some());
        assert!(n.in_app.delivered);
        assert!(n.email.attempted);
        assert!(!n.email.delivered);
        assert!(n.email.error.is_some());

        let stored = db::notifications::load_notification(&pool, n.guid)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.sent_at.is_some());
        assert!(stored.email.error.is_some());
    }

    #[tokio::test]
    async fn all_failed_pass_bumps_retry_and_stays_unsent() {
        let (d, pool) = dispatcher(vec![Arc::new(ScriptedChannel {
            kind: ChannelKind::Email,
            fail: true,
        })])
        .await;
        let r = recipient(None);
        let n = notification(r.guid, NotificationPriority::Normal, vec![ChannelKind::Email]);

        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert!(n.sent_at.is_none());
        assert_eq!(n.retry_count, 1);

        // Still due for the sweep
        let due = db::notifications::due_for_dispatch(&pool, Utc::now())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn quiet_hours_downgrade_to_in_app_below_critical() {
        // Window straddling the current time (wraps past midnight if needed)
        let now = Utc::now();
        let always_quiet = Some(QuietHours {
            start: (now - Duration::hours(1)).time(),
            end: (now + Duration::hours(1)).time(),
        });
        let (d, _pool) = dispatcher(vec![
            Arc::new(ScriptedChannel {
                kind: ChannelKind::Sms,
                fail: false,
            }),
            Arc::new(ScriptedChannel {
                kind: ChannelKind::Email,
                fail: false,
            }),
            Arc::new(ScriptedChannel {
                kind: ChannelKind::InApp,
                fail: false,
            }),
        ])
        .await;
        let r = recipient(always_quiet);

        let n = notification(
            r.guid,
            NotificationPriority::High,
            vec![ChannelKind::Sms, ChannelKind::Email, ChannelKind::InApp],
        );
        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert!(!n.sms.attempted);
        assert!(!n.email.attempted);
        assert!(n.in_app.delivered);

        // CRITICAL pierces quiet hours
        let n = notification(
            r.guid,
            NotificationPriority::Critical,
            vec![ChannelKind::Sms, ChannelKind::InApp],
        );
        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert!(n.sms.delivered);
    }

    #[tokio::test]
    async fn expired_notification_is_never_sent() {
        let (d, _pool) = dispatcher(vec![Arc::new(ScriptedChannel {
            kind: ChannelKind::InApp,
            fail: false,
        })])
        .await;
        let r = recipient(None);
        let n = notification(r.guid, NotificationPriority::Normal, vec![ChannelKind::InApp])
            .with_expiry(Utc::now() - Duration::minutes(1));

        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert!(n.sent_at.is_none());
        assert!(!n.in_app.attempted);
    }

    #[tokio::test]
    async fn sweep_redispatches_and_respects_retry_cap() {
        let (d, pool) = dispatcher(vec![Arc::new(ScriptedChannel {
            kind: ChannelKind::Email,
            fail: true,
        })])
        .await;
        let r = recipient(None);
        db::directory::upsert_user(&pool, &r).await.unwrap();
        let n = notification(r.guid, NotificationPriority::Normal, vec![ChannelKind::Email]);
        let n = d.create_and_dispatch(n, &r).await.unwrap();
        assert_eq!(n.retry_count, 1);

        // Two more failing sweeps exhaust max_retries = 3
        assert_eq!(d.run_retry_sweep().await.unwrap(), 1);
        assert_eq!(d.run_retry_sweep().await.unwrap(), 1);
        assert_eq!(d.run_retry_sweep().await.unwrap(), 0);

        let stored = db::notifications::load_notification(&pool, n.guid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.retry_count, 3);
        assert!(stored.sent_at.is_none());
    }
}
