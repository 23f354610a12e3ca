//! Notification read/query endpoints
//!
//! Dispatch happens inside the pipeline; these endpoints serve the in-app
//! inbox.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::Notification;
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub marked: usize,
}

/// GET /users/:id/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Notification>>> {
    let notifications =
        db::notifications::list_for_recipient(&state.db, user_id, params.limit.unwrap_or(50))
            .await?;
    Ok(Json(notifications))
}

/// GET /users/:id/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let unread = db::notifications::unread_count(&state.db, user_id).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// POST /users/:user_id/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path((user_id, notification_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Notification>> {
    if !db::notifications::mark_read(&state.db, notification_id, user_id).await? {
        // Distinguish "absent" from "already read" for the caller
        return match db::notifications::load_notification(&state.db, notification_id).await? {
            Some(n) if n.recipient_id == user_id => Ok(Json(n)),
            _ => Err(ApiError::NotFound(format!(
                "notification {}",
                notification_id
            ))),
        };
    }

    let notification = db::notifications::load_notification(&state.db, notification_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("notification {}", notification_id)))?;
    Ok(Json(notification))
}

/// POST /users/:id/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<MarkAllReadResponse>> {
    let marked = db::notifications::mark_all_read(&state.db, user_id).await?;
    Ok(Json(MarkAllReadResponse { marked }))
}

/// Build notification routes
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/users/:id/notifications", get(list_notifications))
        .route("/users/:id/notifications/unread-count", get(unread_count))
        .route(
            "/users/:user_id/notifications/:id/read",
            post(mark_read),
        )
        .route("/users/:id/notifications/read-all", post(mark_all_read))
}
