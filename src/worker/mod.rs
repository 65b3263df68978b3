//! The worker pool (C5): a puller, a fixed-size processor fan-out, and a
//! maintenance routine, wired the way the host crate wires its background
//! workers in `services/init.rs` — `tokio::spawn` tasks that `select!` over
//! a `broadcast` shutdown signal.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{RetryConfig, WorkerConfig};
use crate::queue::NotificationQueue;
use crate::services::notifications::NotificationService;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_GROWTH: f64 = 1.5;
const DLQ_HEALTH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker pool is already running")]
    AlreadyRunning,
}

pub struct WorkerPool {
    worker_id: String,
    service: std::sync::Arc<NotificationService>,
    queue: NotificationQueue,
    worker_config: WorkerConfig,
    retry_config: RetryConfig,
    running: Mutex<bool>,
    shutdown: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        service: std::sync::Arc<NotificationService>,
        queue: NotificationQueue,
        worker_config: WorkerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        let short_id = Uuid::new_v4().to_string();
        let worker_id = format!(
            "{}-{}",
            worker_config.id_prefix,
            &short_id[..8.min(short_id.len())]
        );
        let (shutdown, _) = broadcast::channel(4);
        Self {
            worker_id,
            service,
            queue,
            worker_config,
            retry_config,
            running: Mutex::new(false),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Refuses to run concurrently with itself.
    pub fn start(&self) -> Result<(), WorkerError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Err(WorkerError::AlreadyRunning);
            }
            *running = true;
        }

        let batch_size = (self.worker_config.batch_size as usize).max(1);
        let (tx, rx) = mpsc::channel::<String>(2 * batch_size);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::new();

        for i in 0..self.worker_config.concurrency {
            let processor_id = format!("{}-{}", self.worker_id, i);
            let service = self.service.clone();
            let rx = rx.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => None,
                            item = guard.recv() => item,
                        }
                    };
                    let Some(id) = next else { break };
                    if let Err(e) = service.process(&id, &processor_id).await {
                        tracing::warn!(
                            notification_id = %id,
                            processor_id = %processor_id,
                            error = %e,
                            "processing attempt failed"
                        );
                    }
                }
            }));
        }

        handles.push(self.spawn_puller(tx, batch_size));
        handles.push(self.spawn_maintenance());

        *self.handles.lock().unwrap() = handles;
        tracing::info!(worker_id = %self.worker_id, "worker pool started");
        Ok(())
    }

    fn spawn_puller(&self, tx: mpsc::Sender<String>, batch_size: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let batch = batch_size as isize;

        tokio::spawn(async move {
            let mut interval = MIN_POLL_INTERVAL;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match queue.dequeue(batch).await {
                    Ok(ids) if !ids.is_empty() => {
                        interval = MIN_POLL_INTERVAL;
                        for id in ids {
                            if tx.send(id).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => interval = grow(interval),
                    Err(e) => {
                        tracing::warn!(error = %e, "dequeue poll failed; backing off");
                        interval = grow(interval);
                    }
                }
            }
        })
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let queue = self.queue.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let delayed_interval = Duration::from_secs(self.worker_config.delayed_poll_interval_seconds.max(1));
        let cleanup_interval = Duration::from_secs(self.retry_config.expired_cleanup_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut delayed_ticker = tokio::time::interval(delayed_interval);
            let mut dlq_health_ticker = tokio::time::interval(DLQ_HEALTH_INTERVAL);
            let mut reconcile_ticker = tokio::time::interval(RECONCILE_INTERVAL);
            let mut cleanup_ticker = tokio::time::interval(cleanup_interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = delayed_ticker.tick() => {
                        let now = chrono::Utc::now().naive_utc();
                        match queue.promote_delayed(now, 100).await {
                            Ok(n) if n > 0 => tracing::debug!(promoted = n, "promoted delayed notifications into pending"),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "delayed-set promotion failed"),
                        }
                    }
                    _ = dlq_health_ticker.tick() => {
                        if let Err(e) = service.check_dlq_health().await {
                            tracing::warn!(error = %e, "dlq health check failed");
                        }
                    }
                    _ = reconcile_ticker.tick() => {
                        if let Err(e) = service.reconcile().await {
                            tracing::warn!(error = %e, "reconcile cycle failed");
                        }
                    }
                    _ = cleanup_ticker.tick() => {
                        match service.cleanup_expired().await {
                            Ok(n) if n > 0 => tracing::info!(deleted = n, "purged expired notifications"),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "expired cleanup failed"),
                        }
                    }
                }
            }
        })
    }

    /// Closes the quit signal, lets in-flight work drain, and joins every
    /// routine before returning.
    pub async fn stop(&self) {
        {
            let mut running = self.running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
        }

        let _ = self.shutdown.send(());

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!(worker_id = %self.worker_id, "worker pool stopped");
    }
}

fn grow(interval: Duration) -> Duration {
    let grown = interval.as_secs_f64() * POLL_GROWTH;
    Duration::from_secs_f64(grown.min(MAX_POLL_INTERVAL.as_secs_f64()))
}
