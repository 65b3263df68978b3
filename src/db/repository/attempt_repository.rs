use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Attempt, CreateAttempt};
use crate::error::{AppError, AppResult};

pub struct AttemptRepository;

impl AttemptRepository {
    /// Appends an attempt row. `attempt_number` is supplied by the caller
    /// (the service tracks `attempt_count`), keeping the audit log a pure
    /// insert-only sequence per spec's contiguous-numbering invariant.
    pub async fn create_attempt(pool: &SqlitePool, attempt: CreateAttempt) -> AppResult<Attempt> {
        let id = Uuid::new_v4().to_string();

        sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO notification_attempts (
                id, notification_id, attempt_number, success, error_message,
                error_code, response_data, started_at, completed_at, duration_ms, worker_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                id, notification_id, attempt_number, success, error_message,
                error_code, response_data, started_at, completed_at, duration_ms, worker_id
            "#,
        )
        .bind(id)
        .bind(attempt.notification_id)
        .bind(attempt.attempt_number)
        .bind(attempt.success)
        .bind(attempt.error_message)
        .bind(attempt.error_code)
        .bind(attempt.response_data)
        .bind(attempt.started_at)
        .bind(attempt.completed_at)
        .bind(attempt.duration_ms)
        .bind(attempt.worker_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_for_notification(
        pool: &SqlitePool,
        notification_id: &str,
    ) -> AppResult<Vec<Attempt>> {
        sqlx::query_as::<_, Attempt>(
            r#"
            SELECT id, notification_id, attempt_number, success, error_message,
                   error_code, response_data, started_at, completed_at, duration_ms, worker_id
            FROM notification_attempts
            WHERE notification_id = ?
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(notification_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
