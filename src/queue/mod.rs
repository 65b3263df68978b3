//! The priority/delayed queue and distributed processing locks (C2).
//!
//! Redis-backed accelerator in front of the durable store: three sorted sets
//! (pending, delayed, dlq) plus a namespace of short-TTL lock keys. The queue
//! is not the source of truth — losing its state cannot drop a notification,
//! since the store still holds it and the reconciler rebuilds the pending set
//! from there (see `services::notifications::NotificationService::reconcile`).

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;

use crate::error::{AppError, AppResult};

const PENDING_KEY: &str = "notifications:queue:pending";
const DELAYED_KEY: &str = "notifications:queue:delayed";
const DLQ_KEY: &str = "notifications:queue:dlq";
const LOCK_PREFIX: &str = "notifications:lock:";

/// Priority multiplier for pending-set scores. A plain f64 can't carry a true
/// nanosecond epoch losslessly (it only has ~53 bits of mantissa), so this
/// uses millisecond-resolution enqueue time as a practical stand-in for
/// spec's "enqueue_nanos" — still dominated by this scale for any plausible
/// priority tier (0..10).
const PRIORITY_SCALE: f64 = 1e13;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub delayed_count: i64,
    pub dlq_count: i64,
}

#[derive(Clone)]
pub struct NotificationQueue {
    conn: ConnectionManager,
}

impl NotificationQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn lock_key(id: &str) -> String {
        format!("{LOCK_PREFIX}{id}")
    }

    fn pending_score(priority: i32) -> f64 {
        let now_millis = Utc::now().timestamp_millis() as f64;
        (priority as f64) * PRIORITY_SCALE - now_millis
    }

    pub async fn enqueue(&self, id: &str, priority: i32) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(PENDING_KEY, id, Self::pending_score(priority))
            .await
            .map_err(AppError::Queue)
    }

    /// Non-destructive read of the top `limit` pending IDs by descending
    /// score. The per-item processing lock, not removal from this set, is
    /// what prevents duplicate processing.
    pub async fn dequeue(&self, limit: isize) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrevrange(PENDING_KEY, 0, limit.max(1) - 1)
            .await
            .map_err(AppError::Queue)
    }

    pub async fn move_to_delayed(&self, id: &str, retry_at: NaiveDateTime) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let score = retry_at.and_utc().timestamp() as f64;
        redis::pipe()
            .atomic()
            .zrem(PENDING_KEY, id)
            .ignore()
            .zadd(DELAYED_KEY, id, score)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Queue)
    }

    pub async fn move_to_dlq(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let score = Utc::now().timestamp() as f64;
        redis::pipe()
            .atomic()
            .zrem(PENDING_KEY, id)
            .ignore()
            .zrem(DELAYED_KEY, id)
            .ignore()
            .zadd(DLQ_KEY, id, score)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Queue)
    }

    /// Range-scans the delayed set for scores <= now and re-inserts the
    /// results into pending with a fresh near-now score, bounded to `batch`
    /// items per call.
    pub async fn promote_delayed(&self, now: NaiveDateTime, batch: isize) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        let now_ts = now.and_utc().timestamp() as f64;
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now_ts, 0, batch)
            .await
            .map_err(AppError::Queue)?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &due {
            pipe.zrem(DELAYED_KEY, id).ignore();
            pipe.zadd(PENDING_KEY, id, Self::pending_score(0)).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Queue)?;

        Ok(due.len())
    }

    pub async fn remove(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zrem(PENDING_KEY, id)
            .ignore()
            .zrem(DELAYED_KEY, id)
            .ignore()
            .zrem(DLQ_KEY, id)
            .ignore()
            .del(Self::lock_key(id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Queue)
    }

    pub async fn replay_from_dlq(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zrem(DLQ_KEY, id)
            .ignore()
            .zadd(PENDING_KEY, id, Self::pending_score(0))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Queue)
    }

    /// SET-if-absent with a TTL; the lock value is the holder's worker id.
    pub async fn acquire_lock(&self, id: &str, worker_id: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(id))
            .arg(worker_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(AppError::Queue)?;
        Ok(acquired.is_some())
    }

    /// Compare-and-delete release: a no-op if `worker_id` doesn't currently
    /// hold the lock (already expired, or held by someone else).
    pub async fn release_lock(&self, id: &str, worker_id: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let released: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(Self::lock_key(id))
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await
            .map_err(AppError::Queue)?;
        Ok(released == 1)
    }

    pub async fn queue_stats(&self) -> AppResult<QueueStats> {
        let mut conn = self.conn.clone();
        let (pending_count, delayed_count, dlq_count): (i64, i64, i64) = redis::pipe()
            .zcard(PENDING_KEY)
            .zcard(DELAYED_KEY)
            .zcard(DLQ_KEY)
            .query_async(&mut conn)
            .await
            .map_err(AppError::Queue)?;
        Ok(QueueStats {
            pending_count,
            delayed_count,
            dlq_count,
        })
    }
}
