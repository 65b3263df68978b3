//! DLQ management (C6): stats, filtered listing, bulk replay. Thin layer
//! over `NotificationService`'s DLQ-facing methods.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::repository::DlqFilter;
use crate::error::AppResult;
use crate::routes::notifications::NotificationResponse;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(get_dlq_stats))
        .route("/", get(list_dlq))
        .route("/replay", post(replay_dlq))
}

#[derive(Debug, Serialize)]
pub struct DlqStatsResponse {
    pub total_count: i64,
    pub count_by_type: HashMap<String, i64>,
    pub count_by_error: HashMap<String, i64>,
    pub oldest_item: Option<NaiveDateTime>,
}

async fn get_dlq_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<DlqStatsResponse>> {
    let stats = state.notifications.get_dlq_stats().await?;
    Ok(Json(DlqStatsResponse {
        total_count: stats.total_count,
        count_by_type: stats.count_by_type,
        count_by_error: stats.count_by_error,
        oldest_item: stats.oldest_item,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DlqListQuery {
    pub notification_type: Option<String>,
    pub error_code: Option<String>,
    pub since: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

async fn list_dlq(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DlqListQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let filter = DlqFilter {
        notification_type: q.notification_type,
        error_code: q.error_code,
        since: q.since,
        limit: q.limit,
    };
    let rows = state.notifications.get_dlq_notifications(filter).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplayDlqRequest {
    pub notification_type: Option<String>,
    pub error_code: Option<String>,
    pub since: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReplayDlqResponse {
    pub replayed_count: usize,
    pub failed_count: usize,
}

async fn replay_dlq(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplayDlqRequest>,
) -> AppResult<Json<ReplayDlqResponse>> {
    let filter = DlqFilter {
        notification_type: req.notification_type,
        error_code: req.error_code,
        since: req.since,
        limit: req.limit,
    };
    let (replayed_count, failed_count) = state.notifications.replay_dlq(filter).await?;
    Ok(Json(ReplayDlqResponse {
        replayed_count,
        failed_count,
    }))
}
