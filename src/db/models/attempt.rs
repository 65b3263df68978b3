use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

/// Append-only audit record of a single delivery try. Never updated after insert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub id: String,
    pub notification_id: String,
    pub attempt_number: i32,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub response_data: Option<String>,
    pub started_at: NaiveDateTime,
    pub completed_at: NaiveDateTime,
    pub duration_ms: i64,
    pub worker_id: String,
}

pub struct CreateAttempt {
    pub notification_id: String,
    pub attempt_number: i32,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub response_data: Option<String>,
    pub started_at: NaiveDateTime,
    pub completed_at: NaiveDateTime,
    pub duration_ms: i64,
    pub worker_id: String,
}
