//! The notification-relevant slice of the upstream RPC surface (spec.md
//! §6): enqueue, single-record lookup, and queue stats. A thin `Router`
//! calling straight into `NotificationService`, in the shape the host
//! crate's route modules already use.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::models::{Attempt, CreateNotificationRequest, Notification, NotificationType};
use crate::error::AppResult;
use crate::queue::QueueStats;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(enqueue_notification))
        .route("/queue/stats", get(get_queue_stats))
        .route("/log-result", post(log_notification_result))
        .route("/:id", get(get_notification))
        .route("/:id/attempts", get(get_notification_attempts))
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub notification_id: String,
    pub status: String,
}

async fn enqueue_notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNotificationRequest>,
) -> AppResult<Json<EnqueueResponse>> {
    let notification = state.notifications.enqueue(req).await?;
    Ok(Json(EnqueueResponse {
        notification_id: notification.id,
        status: notification.status,
    }))
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub user_id: String,
    pub notification_type: String,
    pub channel: String,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id,
            notification_type: n.notification_type,
            channel: n.channel,
            status: n.status,
            attempt_count: n.attempt_count,
            max_attempts: n.max_attempts,
            last_error: n.last_error,
            next_retry_at: n.next_retry_at,
            delivered_at: n.delivered_at,
            created_at: n.created_at,
        }
    }
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<NotificationResponse>> {
    let notification = state.notifications.get_by_id(&id).await?;
    Ok(Json(notification.into()))
}

async fn get_queue_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<QueueStats>> {
    let stats = state.notifications.queue_stats().await?;
    Ok(Json(stats))
}

/// `LogNotificationResult` (spec.md §6): an external sender's post-hoc
/// audit path, distinct from the normal `enqueue` -> `process` flow.
#[derive(Debug, Deserialize)]
pub struct LogNotificationResultRequest {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub status: LogResultStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogResultStatus {
    Delivered,
    Failed,
}

async fn log_notification_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LogNotificationResultRequest>,
) -> AppResult<Json<NotificationResponse>> {
    let delivered = matches!(req.status, LogResultStatus::Delivered);
    let notification = state
        .notifications
        .log_notification_result(req.user_id, req.notification_type, delivered)
        .await?;
    Ok(Json(notification.into()))
}

async fn get_notification_attempts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Attempt>>> {
    let attempts = state.notifications.list_attempts(&id).await?;
    Ok(Json(attempts))
}
