use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub telegram: TelegramConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Default cap on retries per notification.
    pub default_max_attempts: u32,
    /// First retry delay, in seconds.
    pub base_retry_delay_seconds: u64,
    /// Per-attempt backoff growth factor.
    pub backoff_multiplier: u64,
    /// Retry delay cap, in seconds.
    pub max_retry_delay_seconds: u64,
    /// Per-notification processing lock lifetime, in seconds.
    pub lock_ttl_seconds: u64,
    /// DLQ aging window, in days. Informational: no trimmer reads this yet.
    pub dlq_retention_days: u32,
    /// How often to purge expired rows, in seconds.
    pub expired_cleanup_interval_seconds: u64,
}

impl RetryConfig {
    pub fn lock_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Informational producer-side guardrail; not enforced by the core.
    pub per_user: u32,
    /// Window, in seconds, for `per_user`.
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Processor routines per worker.
    pub concurrency: u32,
    /// Max IDs per dequeue.
    pub batch_size: u32,
    /// Delayed-set promotion cadence, in seconds.
    pub delayed_poll_interval_seconds: u64,
    /// Worker ID prefix; the full ID is `"<prefix>-<8-char-uuid>"`.
    pub id_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
                request_timeout_seconds: env::var("TELEGRAM_REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            retry: RetryConfig {
                default_max_attempts: env::var("RETRY_DEFAULT_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                base_retry_delay_seconds: env::var("RETRY_BASE_DELAY_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                backoff_multiplier: env::var("RETRY_BACKOFF_MULTIPLIER")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                max_retry_delay_seconds: env::var("RETRY_MAX_DELAY_SECONDS")
                    .unwrap_or_else(|_| "43200".to_string()) // 12h
                    .parse()
                    .unwrap_or(43200),
                lock_ttl_seconds: env::var("RETRY_LOCK_TTL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                dlq_retention_days: env::var("RETRY_DLQ_RETENTION_DAYS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                expired_cleanup_interval_seconds: env::var("RETRY_EXPIRED_CLEANUP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string()) // 1h
                    .parse()
                    .unwrap_or(3600),
            },
            rate_limit: RateLimitConfig {
                per_user: env::var("RATE_LIMIT_PER_USER")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                window_seconds: env::var("RATE_LIMIT_WINDOW_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
            worker: WorkerConfig {
                concurrency: env::var("WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                batch_size: env::var("WORKER_BATCH_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                delayed_poll_interval_seconds: env::var("WORKER_DELAYED_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                id_prefix: env::var("WORKER_ID_PREFIX")
                    .unwrap_or_else(|_| "notif-worker".to_string()),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/notifications.db".to_string(),
                max_connections: 5,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            telegram: TelegramConfig {
                bot_token: None,
                request_timeout_seconds: 10,
            },
            retry: RetryConfig {
                default_max_attempts: 5,
                base_retry_delay_seconds: 60,
                backoff_multiplier: 5,
                max_retry_delay_seconds: 43_200,
                lock_ttl_seconds: 30,
                dlq_retention_days: 30,
                expired_cleanup_interval_seconds: 3_600,
            },
            rate_limit: RateLimitConfig {
                per_user: 10,
                window_seconds: 60,
            },
            worker: WorkerConfig {
                concurrency: 5,
                batch_size: 10,
                delayed_poll_interval_seconds: 10,
                id_prefix: "notif-worker".to_string(),
            },
        }
    }
}
