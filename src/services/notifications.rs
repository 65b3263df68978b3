//! The notification service (C3): the orchestrator tying the durable store
//! (C1), the queue (C2), and the sender registry (C4) together. Everything
//! in here is a direct translation of spec.md §4.3's numbered protocols.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::config::RetryConfig;
use crate::db::models::{CreateAttempt, CreateNotificationRequest, ErrorCode, Notification, NotificationStatus};
use crate::db::repository::{AttemptRepository, DlqFilter, DlqStats, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::queue::{NotificationQueue, QueueStats};
use crate::services::alert::{AlertEvent, AlertLevel, AlertSink};
use crate::services::sender::{SendResult, SenderRegistry};

pub struct NotificationService {
    db: SqlitePool,
    queue: NotificationQueue,
    senders: Arc<SenderRegistry>,
    alert_sink: Arc<dyn AlertSink>,
    retry: RetryConfig,
}

impl NotificationService {
    pub fn new(
        db: SqlitePool,
        queue: NotificationQueue,
        senders: Arc<SenderRegistry>,
        alert_sink: Arc<dyn AlertSink>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            queue,
            senders,
            alert_sink,
            retry,
        }
    }

    /// §4.3.1 Enqueue(req). Defaults (channel, max_attempts) are applied by
    /// `NotificationRepository::create`; idempotent re-submission returns the
    /// existing row without re-touching the queue.
    pub async fn enqueue(&self, req: CreateNotificationRequest) -> AppResult<Notification> {
        let priority = req.priority.unwrap_or(0);

        match NotificationRepository::create(&self.db, req).await {
            Ok(notification) => {
                if let Err(e) = self.queue.enqueue(&notification.id, priority).await {
                    tracing::warn!(
                        notification_id = %notification.id,
                        error = %e,
                        "failed to enqueue into pending set; reconciler will recover it"
                    );
                }
                Ok(notification)
            }
            Err(AppError::Conflict(existing_id)) => {
                NotificationRepository::get_by_id(&self.db, &existing_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// §4.3.2 Process(id, worker_id): a single delivery attempt.
    pub async fn process(&self, id: &str, worker_id: &str) -> AppResult<()> {
        if !self.queue.acquire_lock(id, worker_id, self.retry.lock_ttl()).await? {
            // Another worker already holds the lock; not an error.
            return Ok(());
        }

        let result = self.process_locked(id, worker_id).await;

        if let Err(e) = self.queue.release_lock(id, worker_id).await {
            tracing::warn!(notification_id = %id, error = %e, "failed to release processing lock");
        }

        result
    }

    async fn process_locked(&self, id: &str, worker_id: &str) -> AppResult<()> {
        let notification = NotificationRepository::get_by_id(&self.db, id).await?;

        let status = notification.status()?;
        if matches!(
            status,
            NotificationStatus::Delivered | NotificationStatus::Dlq | NotificationStatus::Cancelled
        ) {
            self.queue.remove(id).await.ok();
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        if notification.is_expired(now) {
            self.queue.remove(id).await.ok();
            return Ok(());
        }

        let channel = notification.channel()?;
        let started_at = Utc::now().naive_utc();
        let send_result = match self.senders.get(channel) {
            Some(sender) => sender.send(&notification).await,
            None => SendResult::failure(
                ErrorCode::InvalidPayload,
                format!("no sender registered for channel {channel:?}"),
                None,
            ),
        };
        let completed_at = Utc::now().naive_utc();

        let attempt_number = notification.attempt_count + 1;
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

        let attempt = CreateAttempt {
            notification_id: notification.id.clone(),
            attempt_number,
            success: send_result.success,
            error_message: send_result.error.clone(),
            error_code: (!send_result.success).then(|| send_result.error_code.as_str().to_string()),
            response_data: send_result.response_data.as_ref().map(|v| v.to_string()),
            started_at,
            completed_at,
            duration_ms,
            worker_id: worker_id.to_string(),
        };
        // Attempt recording is best-effort: it must never block the lifecycle transition.
        if let Err(e) = AttemptRepository::create_attempt(&self.db, attempt).await {
            tracing::warn!(notification_id = %notification.id, error = %e, "failed to record attempt");
        }

        if send_result.success {
            self.mark_delivered(&notification).await
        } else {
            self.handle_failure(
                &notification,
                send_result.error_code,
                send_result.error.unwrap_or_else(|| "unknown error".to_string()),
            )
            .await
        }
    }

    /// §4.3.3 Mark-delivered.
    async fn mark_delivered(&self, notification: &Notification) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let attempt_count = notification.attempt_count + 1;
        NotificationRepository::mark_delivered(&self.db, &notification.id, attempt_count, now).await?;
        if let Err(e) = self.queue.remove(&notification.id).await {
            tracing::warn!(notification_id = %notification.id, error = %e, "failed to remove delivered notification from queue");
        }
        Ok(())
    }

    /// §4.3.4 Handle-failure(error_code, error).
    async fn handle_failure(
        &self,
        notification: &Notification,
        error_code: ErrorCode,
        error: String,
    ) -> AppResult<()> {
        let new_attempts = notification.attempt_count + 1;
        let eligible = error_code.should_retry() && new_attempts < notification.max_attempts;

        if !eligible {
            return self.move_to_dlq(notification, new_attempts, error_code, error).await;
        }

        let delay_secs = compute_backoff_seconds(
            new_attempts as u32,
            self.retry.base_retry_delay_seconds,
            self.retry.backoff_multiplier,
            self.retry.max_retry_delay_seconds,
        );
        let now = Utc::now().naive_utc();
        let mut next_retry_at = now + chrono::Duration::seconds(delay_secs as i64);
        // `next_retry_at` must be monotonically non-decreasing across attempts.
        if let Some(prev) = notification.next_retry_at {
            if next_retry_at < prev {
                next_retry_at = prev;
            }
        }

        NotificationRepository::update_for_retry(
            &self.db,
            &notification.id,
            new_attempts,
            next_retry_at,
            Some(&error),
            Some(error_code.as_str()),
        )
        .await?;

        if let Err(e) = self.queue.move_to_delayed(&notification.id, next_retry_at).await {
            tracing::warn!(notification_id = %notification.id, error = %e, "failed to move notification to delayed set; reconciler will recover it");
        }

        Ok(())
    }

    /// §4.3.5 Move-to-DLQ.
    async fn move_to_dlq(
        &self,
        notification: &Notification,
        attempt_count: i32,
        error_code: ErrorCode,
        error: String,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        NotificationRepository::move_to_dlq(
            &self.db,
            &notification.id,
            attempt_count,
            now,
            Some(&error),
            Some(error_code.as_str()),
        )
        .await?;

        if let Err(e) = self.queue.move_to_dlq(&notification.id).await {
            tracing::warn!(notification_id = %notification.id, error = %e, "failed to move notification into dlq set");
        }

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "notification".to_string());
        tags.insert("type".to_string(), notification.notification_type.clone());
        tags.insert("channel".to_string(), notification.channel.clone());
        tags.insert("error_code".to_string(), error_code.as_str().to_string());

        let mut extras = HashMap::new();
        extras.insert(
            "notification_id".to_string(),
            serde_json::Value::String(notification.id.clone()),
        );
        extras.insert("attempt_count".to_string(), serde_json::json!(attempt_count));
        extras.insert("max_attempts".to_string(), serde_json::json!(notification.max_attempts));
        extras.insert("error_message".to_string(), serde_json::Value::String(error));

        self.alert_sink.capture_message(AlertEvent {
            message: format!("notification {} moved to dlq", notification.id),
            level: AlertLevel::Warning,
            tags,
            user: Some(notification.user_id.clone()),
            extras,
            breadcrumb_category: Some("notification".to_string()),
        });

        Ok(())
    }

    /// §4.3.7 ReplayDLQ(filter). Returns (replayed_count, failed_count).
    pub async fn replay_dlq(&self, filter: DlqFilter) -> AppResult<(usize, usize)> {
        let rows = NotificationRepository::get_dlq_notifications(&self.db, &filter).await?;
        let mut replayed = 0;
        let mut failed = 0;

        for row in rows {
            match NotificationRepository::reset_for_replay(&self.db, &row.id).await {
                Ok(_) => {
                    if let Err(e) = self.queue.replay_from_dlq(&row.id).await {
                        tracing::warn!(notification_id = %row.id, error = %e, "failed to re-enqueue replayed notification; reconciler will recover it");
                    }
                    replayed += 1;
                }
                Err(e) => {
                    tracing::warn!(notification_id = %row.id, error = %e, "failed to reset dlq notification for replay");
                    failed += 1;
                }
            }
        }

        Ok((replayed, failed))
    }

    /// §4.3.8 Reconcile(): repairs divergence between the store and the queue.
    pub async fn reconcile(&self) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let stale_before = now - chrono::Duration::minutes(10);
        let candidates = NotificationRepository::get_stale_in_flight(&self.db, stale_before, 100).await?;

        for notification in candidates {
            let acquired = self
                .queue
                .acquire_lock(&notification.id, "reconciler", std::time::Duration::from_secs(600))
                .await?;
            if !acquired {
                continue;
            }

            let created_too_old = notification.created_at < now - chrono::Duration::hours(1);
            let attempts_exhausted = notification.attempt_count >= notification.max_attempts;

            if created_too_old || attempts_exhausted {
                if let Err(e) = NotificationRepository::move_to_dlq(
                    &self.db,
                    &notification.id,
                    notification.attempt_count,
                    now,
                    Some("orphaned notification"),
                    Some(ErrorCode::ServiceDown.as_str()),
                )
                .await
                {
                    tracing::warn!(notification_id = %notification.id, error = %e, "reconciler failed to move orphaned notification to dlq");
                }
                self.queue.move_to_dlq(&notification.id).await.ok();
            } else if let Err(e) = self.queue.enqueue(&notification.id, 0).await {
                tracing::warn!(notification_id = %notification.id, error = %e, "reconciler failed to re-enqueue notification");
            }

            if let Err(e) = self.queue.release_lock(&notification.id, "reconciler").await {
                tracing::warn!(notification_id = %notification.id, error = %e, "reconciler failed to release its lock");
            }
        }

        Ok(())
    }

    /// §4.3.9 CheckDLQHealth().
    pub async fn check_dlq_health(&self) -> AppResult<()> {
        let stats = NotificationRepository::get_dlq_stats(&self.db).await?;

        if stats.total_count >= 50 {
            self.emit_dlq_threshold_alert(&stats, AlertLevel::Error);
        } else if stats.total_count >= 10 {
            self.emit_dlq_threshold_alert(&stats, AlertLevel::Warning);
        }

        if let Some(oldest) = stats.oldest_item {
            let age = Utc::now().naive_utc() - oldest;
            if age > chrono::Duration::hours(24) {
                let mut tags = HashMap::new();
                tags.insert("service".to_string(), "notification".to_string());
                tags.insert("alert_type".to_string(), "dlq_stale".to_string());
                let mut extras = HashMap::new();
                extras.insert("oldest_item".to_string(), serde_json::json!(oldest.to_string()));
                extras.insert("age_hours".to_string(), serde_json::json!(age.num_hours()));

                self.alert_sink.capture_message(AlertEvent {
                    message: "dead letter queue has an entry older than 24h".to_string(),
                    level: AlertLevel::Warning,
                    tags,
                    user: None,
                    extras,
                    breadcrumb_category: Some("notification".to_string()),
                });
            }
        }

        Ok(())
    }

    fn emit_dlq_threshold_alert(&self, stats: &DlqStats, level: AlertLevel) {
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "notification".to_string());
        tags.insert("alert_type".to_string(), "dlq_threshold".to_string());
        let mut extras = HashMap::new();
        extras.insert("total_count".to_string(), serde_json::json!(stats.total_count));
        extras.insert("count_by_type".to_string(), serde_json::json!(stats.count_by_type));
        extras.insert("count_by_error".to_string(), serde_json::json!(stats.count_by_error));

        self.alert_sink.capture_message(AlertEvent {
            message: format!("dead letter queue size is {}", stats.total_count),
            level,
            tags,
            user: None,
            extras,
            breadcrumb_category: Some("notification".to_string()),
        });
    }

    /// `CleanupExpired` as a periodic maintenance tick (SPEC_FULL.md §B).
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        NotificationRepository::cleanup_expired(&self.db).await
    }

    /// Rebuilds the pending set from C1 on startup, since the queue is a
    /// volatile accelerator and may be empty (or stale) across a restart
    /// while the store still holds work to do (spec.md §4.1, §4.2 failure model).
    pub async fn seed_queue_from_store(&self) -> AppResult<usize> {
        let rows = NotificationRepository::get_pending_notifications(&self.db, 1000).await?;
        let count = rows.len();
        for row in rows {
            if let Err(e) = self.queue.enqueue(&row.id, row.priority).await {
                tracing::warn!(notification_id = %row.id, error = %e, "failed to seed pending notification into queue");
            }
        }
        Ok(count)
    }

    /// `LogNotificationResult` (spec.md §6): a side path used by an external
    /// sender to record post-hoc audit outside this pipeline's own
    /// enqueue/process flow. Creates a minimal notification row already in
    /// its terminal status; never touches the queue or the attempts log.
    pub async fn log_notification_result(
        &self,
        user_id: String,
        notification_type: crate::db::models::NotificationType,
        delivered: bool,
    ) -> AppResult<Notification> {
        let now = Utc::now().naive_utc();
        let status = if delivered { "delivered" } else { "failed" };
        NotificationRepository::create_log_entry(&self.db, &user_id, notification_type.as_str(), status, now)
            .await
    }

    pub async fn get_by_id(&self, id: &str) -> AppResult<Notification> {
        NotificationRepository::get_by_id(&self.db, id).await
    }

    pub async fn get_dlq_stats(&self) -> AppResult<DlqStats> {
        NotificationRepository::get_dlq_stats(&self.db).await
    }

    pub async fn list_attempts(&self, notification_id: &str) -> AppResult<Vec<crate::db::models::Attempt>> {
        AttemptRepository::list_for_notification(&self.db, notification_id).await
    }

    pub async fn get_dlq_notifications(&self, filter: DlqFilter) -> AppResult<Vec<Notification>> {
        NotificationRepository::get_dlq_notifications(&self.db, &filter).await
    }

    pub async fn queue_stats(&self) -> AppResult<QueueStats> {
        self.queue.queue_stats().await
    }
}

/// §4.3.6 Backoff schedule: `delay(n) = min(base * multiplier^(n-1), cap)`
/// for the n-th completed attempt, computed with saturating integer
/// multiplication rather than floating-point exponentiation.
pub fn compute_backoff_seconds(new_attempts: u32, base: u64, multiplier: u64, cap: u64) -> u64 {
    let mut delay = base.min(cap);
    for _ in 1..new_attempts {
        if delay >= cap {
            return cap;
        }
        delay = delay.saturating_mul(multiplier).min(cap);
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_documented_schedule() {
        let base = 60;
        let mult = 5;
        let cap = 43_200;
        // attempt 2 waits 1m, 3 waits 5m, 4 waits 25m, 5 waits ~2h5m.
        assert_eq!(compute_backoff_seconds(1, base, mult, cap), 60);
        assert_eq!(compute_backoff_seconds(2, base, mult, cap), 300);
        assert_eq!(compute_backoff_seconds(3, base, mult, cap), 1_500);
        assert_eq!(compute_backoff_seconds(4, base, mult, cap), 7_500);
        // Cap must bind before any further multiplication overflows or overshoots.
        assert_eq!(compute_backoff_seconds(6, base, mult, cap), cap);
        assert_eq!(compute_backoff_seconds(20, base, mult, cap), cap);
    }

    #[test]
    fn error_code_retry_eligibility() {
        assert!(!ErrorCode::UserBlocked.should_retry());
        assert!(!ErrorCode::InvalidPayload.should_retry());
        assert!(ErrorCode::RateLimited.should_retry());
        assert!(ErrorCode::NetworkError.should_retry());
        assert!(ErrorCode::ServiceDown.should_retry());
        assert!(ErrorCode::Unknown.should_retry());
    }
}
