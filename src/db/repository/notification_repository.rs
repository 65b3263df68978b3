use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateNotificationRequest, Notification};
use crate::error::{AppError, AppResult};

const NOTIFICATION_COLUMNS: &str = r#"
    id,
    user_id,
    notification_type,
    channel,
    payload_json,
    status,
    priority,
    attempt_count,
    max_attempts,
    next_retry_at,
    last_error,
    last_error_code,
    related_match_id,
    related_user_id,
    idempotency_key,
    expires_at,
    created_at,
    updated_at,
    delivered_at,
    dlq_at
"#;

#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub notification_type: Option<String>,
    pub error_code: Option<String>,
    pub since: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DlqStats {
    pub total_count: i64,
    pub count_by_type: HashMap<String, i64>,
    pub count_by_error: HashMap<String, i64>,
    pub oldest_item: Option<NaiveDateTime>,
}

/// The durable store (C1): source of truth for notification lifecycle state.
///
/// Mirrors `NotificationQueueRepository`'s claim pattern (atomic single-statement
/// `UPDATE ... RETURNING`) but keyed on the full notification/attempt model rather
/// than a flat retry-queue row, and uses the runtime-checked `query_as::<_, T>`
/// style throughout since no offline `.sqlx` metadata is available here.
pub struct NotificationRepository;

impl NotificationRepository {
    pub async fn create(
        pool: &SqlitePool,
        req: CreateNotificationRequest,
    ) -> AppResult<Notification> {
        req.validate()?;

        if let Some(ref key) = req.idempotency_key {
            if let Some(existing) = Self::find_by_idempotency_key_opt(pool, key).await? {
                return Err(AppError::Conflict(existing.id));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let channel = req.channel.unwrap_or(crate::db::models::Channel::Telegram);
        let max_attempts = req.max_attempts.unwrap_or(5);
        let priority = req.priority.unwrap_or(0);
        let payload_json = serde_json::to_string(&req.payload)
            .map_err(|e| AppError::Validation(format!("failed to serialize payload: {e}")))?;

        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications (
                id, user_id, notification_type, channel, payload_json, status,
                priority, attempt_count, max_attempts, next_retry_at,
                last_error, last_error_code, related_match_id, related_user_id,
                idempotency_key, expires_at, created_at, updated_at, delivered_at, dlq_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', ?, 0, ?, NULL, NULL, NULL, ?, ?, ?, ?, ?, ?, NULL, NULL)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&req.user_id)
        .bind(req.notification_type.as_str())
        .bind(channel.as_str())
        .bind(&payload_json)
        .bind(priority)
        .bind(max_attempts)
        .bind(&req.related_match_id)
        .bind(&req.related_user_id)
        .bind(&req.idempotency_key)
        .bind(req.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match row {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if let Some(ref key) = req.idempotency_key {
                    Self::find_by_idempotency_key(pool, key).await
                } else {
                    Err(AppError::Database(sqlx::Error::Database(db_err)))
                }
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// Minimal row for the `LogNotificationResult` side path (spec.md §6):
    /// an external sender recording a post-hoc audit entry outside this
    /// pipeline's own enqueue/process flow. No payload, no queue or attempt
    /// state — `status` is written directly to its terminal value.
    pub async fn create_log_entry(
        pool: &SqlitePool,
        user_id: &str,
        notification_type: &str,
        status: &str,
        now: NaiveDateTime,
    ) -> AppResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let delivered_at = (status == "delivered").then_some(now);
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications (
                id, user_id, notification_type, channel, payload_json, status,
                priority, attempt_count, max_attempts, next_retry_at,
                last_error, last_error_code, related_match_id, related_user_id,
                idempotency_key, expires_at, created_at, updated_at, delivered_at, dlq_at
            ) VALUES (?, ?, ?, 'telegram', '{{}}', ?, 0, 1, 1, NULL, NULL, NULL, NULL, NULL, NULL, NULL, ?, ?, ?, NULL)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(notification_type)
        .bind(status)
        .bind(now)
        .bind(now)
        .bind(delivered_at)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> AppResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound(format!("notification {id} not found")))
    }

    async fn find_by_idempotency_key_opt(
        pool: &SqlitePool,
        key: &str,
    ) -> AppResult<Option<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_idempotency_key(pool: &SqlitePool, key: &str) -> AppResult<Notification> {
        Self::find_by_idempotency_key_opt(pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("notification with key {key} not found")))
    }

    pub async fn update_for_retry(
        pool: &SqlitePool,
        id: &str,
        attempt_count: i32,
        next_retry_at: NaiveDateTime,
        last_error: Option<&str>,
        last_error_code: Option<&str>,
    ) -> AppResult<Notification> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'failed',
                attempt_count = ?,
                next_retry_at = ?,
                last_error = ?,
                last_error_code = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(last_error)
        .bind(last_error_code)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn mark_delivered(
        pool: &SqlitePool,
        id: &str,
        attempt_count: i32,
        delivered_at: NaiveDateTime,
    ) -> AppResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'delivered', attempt_count = ?, delivered_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(attempt_count)
        .bind(delivered_at)
        .bind(delivered_at)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn move_to_dlq(
        pool: &SqlitePool,
        id: &str,
        attempt_count: i32,
        dlq_at: NaiveDateTime,
        last_error: Option<&str>,
        last_error_code: Option<&str>,
    ) -> AppResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'dlq', attempt_count = ?, dlq_at = ?, last_error = ?, last_error_code = ?, updated_at = ?
            WHERE id = ?
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(attempt_count)
        .bind(dlq_at)
        .bind(last_error)
        .bind(last_error_code)
        .bind(dlq_at)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn get_pending_notifications(
        pool: &SqlitePool,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE status IN ('pending', 'failed')
              AND (next_retry_at IS NULL OR next_retry_at <= CURRENT_TIMESTAMP)
              AND (expires_at IS NULL OR expires_at > CURRENT_TIMESTAMP)
            ORDER BY priority DESC, created_at ASC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Reconciler candidate query: rows stuck in a non-terminal state whose
    /// `updated_at` is stale, oldest-updated first.
    pub async fn get_stale_in_flight(
        pool: &SqlitePool,
        stale_before: NaiveDateTime,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE status IN ('pending', 'processing', 'failed')
              AND updated_at < ?
              AND (expires_at IS NULL OR expires_at > CURRENT_TIMESTAMP)
            ORDER BY updated_at ASC
            LIMIT ?
            "#
        ))
        .bind(stale_before)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn get_dlq_notifications(
        pool: &SqlitePool,
        filter: &DlqFilter,
    ) -> AppResult<Vec<Notification>> {
        let limit = filter.limit.unwrap_or(100);
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE status = 'dlq'
              AND (? IS NULL OR notification_type = ?)
              AND (? IS NULL OR last_error_code = ?)
              AND (? IS NULL OR dlq_at >= ?)
            ORDER BY dlq_at DESC
            LIMIT ?
            "#
        ))
        .bind(&filter.notification_type)
        .bind(&filter.notification_type)
        .bind(&filter.error_code)
        .bind(&filter.error_code)
        .bind(filter.since)
        .bind(filter.since)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn get_dlq_stats(pool: &SqlitePool) -> AppResult<DlqStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE status = 'dlq'")
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT notification_type, COUNT(*) FROM notifications WHERE status = 'dlq' GROUP BY notification_type",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        let by_error: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT last_error_code, COUNT(*) FROM notifications WHERE status = 'dlq' GROUP BY last_error_code",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        let oldest: (Option<NaiveDateTime>,) =
            sqlx::query_as("SELECT MIN(dlq_at) FROM notifications WHERE status = 'dlq'")
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(DlqStats {
            total_count: total.0,
            count_by_type: by_type.into_iter().collect(),
            count_by_error: by_error
                .into_iter()
                .map(|(k, v)| (k.unwrap_or_else(|| "UNKNOWN".to_string()), v))
                .collect(),
            oldest_item: oldest.0,
        })
    }

    /// Resets a DLQ row back to pending for replay. No-op error if not currently `dlq`.
    pub async fn reset_for_replay(pool: &SqlitePool, id: &str) -> AppResult<Notification> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'pending', attempt_count = 0, next_retry_at = NULL, dlq_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'dlq'
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.ok_or_else(|| AppError::Conflict(format!("notification {id} is not in dlq")))
    }

    pub async fn cleanup_expired(pool: &SqlitePool) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at < CURRENT_TIMESTAMP",
        )
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
