//! Notification persistence
//!
//! Per-channel delivery state is stored as JSON blobs; the retry sweep
//! query enforces the expiry and retry-cap laws at the database level so a
//! crashed dispatch pass can never resurrect an expired notification.

use crate::models::{ChannelKind, Notification, NotificationType};
use chrono::{DateTime, Utc};
use ecgx_common::urgency::NotificationPriority;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::analyses::{parse_ts, parse_ts_opt, parse_uuid};
use ecgx_common::{Error, Result};

/// Insert a new notification record
pub async fn insert_notification(pool: &SqlitePool, n: &Notification) -> Result<()> {
    let requested = serde_json::to_string(&n.requested_channels)
        .map_err(|e| Error::Internal(format!("Failed to serialize channels: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO notifications (
            guid, recipient_id, title, message, notification_type, priority,
            requested_channels, analysis_id,
            email_delivery, sms_delivery, push_delivery, in_app_delivery,
            sent_at, read_at, scheduled_for, expires_at,
            retry_count, max_retries, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(n.guid.to_string())
    .bind(n.recipient_id.to_string())
    .bind(&n.title)
    .bind(&n.message)
    .bind(n.notification_type.as_str())
    .bind(n.priority.as_str())
    .bind(requested)
    .bind(n.analysis_id.map(|id| id.to_string()))
    .bind(delivery_json(&n.email)?)
    .bind(delivery_json(&n.sms)?)
    .bind(delivery_json(&n.push)?)
    .bind(delivery_json(&n.in_app)?)
    .bind(n.sent_at.map(|t| t.to_rfc3339()))
    .bind(n.read_at.map(|t| t.to_rfc3339()))
    .bind(n.scheduled_for.map(|t| t.to_rfc3339()))
    .bind(n.expires_at.map(|t| t.to_rfc3339()))
    .bind(n.retry_count as i64)
    .bind(n.max_retries as i64)
    .bind(n.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one notification by id
pub async fn load_notification(pool: &SqlitePool, guid: Uuid) -> Result<Option<Notification>> {
    let row = sqlx::query("SELECT * FROM notifications WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| notification_from_row(&r)).transpose()
}

/// Persist the outcome of a dispatch pass (channel flags, sent_at, retries)
pub async fn update_dispatch_outcome(pool: &SqlitePool, n: &Notification) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE notifications
        SET email_delivery = ?, sms_delivery = ?, push_delivery = ?, in_app_delivery = ?,
            sent_at = ?, retry_count = ?
        WHERE guid = ?
        "#,
    )
    .bind(delivery_json(&n.email)?)
    .bind(delivery_json(&n.sms)?)
    .bind(delivery_json(&n.push)?)
    .bind(delivery_json(&n.in_app)?)
    .bind(n.sent_at.map(|t| t.to_rfc3339()))
    .bind(n.retry_count as i64)
    .bind(n.guid.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark one notification read; returns false when already read or absent
pub async fn mark_read(pool: &SqlitePool, guid: Uuid, recipient_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE notifications SET read_at = ?
        WHERE guid = ? AND recipient_id = ? AND read_at IS NULL
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .bind(recipient_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark all of a recipient's notifications read; returns the count
pub async fn mark_all_read(pool: &SqlitePool, recipient_id: Uuid) -> Result<usize> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = ? WHERE recipient_id = ? AND read_at IS NULL",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(recipient_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Unread count for a recipient
pub async fn unread_count(pool: &SqlitePool, recipient_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND read_at IS NULL",
    )
    .bind(recipient_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Recent notifications for a recipient, newest first
pub async fn list_for_recipient(
    pool: &SqlitePool,
    recipient_id: Uuid,
    limit: i64,
) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        "SELECT * FROM notifications WHERE recipient_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(recipient_id.to_string())
    .bind(limit.clamp(1, 200))
    .fetch_all(pool)
    .await?;

    rows.iter().map(notification_from_row).collect()
}

/// Notifications due for a (re)dispatch pass
///
/// Excludes: already-sent-successfully rows, expired rows, rows past their
/// retry cap, and rows scheduled for the future.
pub async fn due_for_dispatch(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Notification>> {
    let now_str = now.to_rfc3339();
    let rows = sqlx::query(
        r#"
        SELECT * FROM notifications
        WHERE sent_at IS NULL
          AND retry_count < max_retries
          AND (expires_at IS NULL OR expires_at > ?)
          AND (scheduled_for IS NULL OR scheduled_for <= ?)
        ORDER BY created_at ASC
        "#,
    )
    .bind(&now_str)
    .bind(&now_str)
    .fetch_all(pool)
    .await?;

    rows.iter().map(notification_from_row).collect()
}

fn delivery_json(d: &crate::models::ChannelDelivery) -> Result<String> {
    serde_json::to_string(d)
        .map_err(|e| Error::Internal(format!("Failed to serialize delivery state: {}", e)))
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    let notification_type: String = row.get("notification_type");
    let notification_type = NotificationType::parse(&notification_type)
        .ok_or_else(|| Error::Internal(format!("Unknown notification type: {}", notification_type)))?;

    let priority: String = row.get("priority");
    let priority = NotificationPriority::parse(&priority)
        .ok_or_else(|| Error::Internal(format!("Unknown priority: {}", priority)))?;

    let requested: String = row.get("requested_channels");
    let requested_channels: Vec<ChannelKind> = serde_json::from_str(&requested)
        .map_err(|e| Error::Internal(format!("Failed to deserialize channels: {}", e)))?;

    let parse_delivery = |col: &str| -> Result<crate::models::ChannelDelivery> {
        let json: String = row.get(col);
        serde_json::from_str(&json)
            .map_err(|e| Error::Internal(format!("Failed to deserialize delivery state: {}", e)))
    };

    let analysis_id: Option<String> = row.get("analysis_id");
    let analysis_id = analysis_id.as_deref().map(parse_uuid).transpose()?;

    Ok(Notification {
        guid: parse_uuid(&row.get::<String, _>("guid"))?,
        recipient_id: parse_uuid(&row.get::<String, _>("recipient_id"))?,
        title: row.get("title"),
        message: row.get("message"),
        notification_type,
        priority,
        requested_channels,
        analysis_id,
        email: parse_delivery("email_delivery")?,
        sms: parse_delivery("sms_delivery")?,
        push: parse_delivery("push_delivery")?,
        in_app: parse_delivery("in_app_delivery")?,
        sent_at: parse_ts_opt(row.get("sent_at"))?,
        read_at: parse_ts_opt(row.get("read_at"))?,
        scheduled_for: parse_ts_opt(row.get("scheduled_for"))?,
        expires_at: parse_ts_opt(row.get("expires_at"))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        created_at: parse_ts(row.get("created_at"))?,
    })
}
