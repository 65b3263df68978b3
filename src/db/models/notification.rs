use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The kind of event a notification represents. Mirrors the producer-side
/// taxonomy; unrecognized values round-trip through [`NotificationType::Unknown`]
/// rather than failing deserialization outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    MutualMatch,
    NewLike,
    MatchReminder,
    ProfileIncomplete,
    Welcome,
    System,
    ReengagementGentle,
    ReengagementUrgent,
    ReengagementLastChance,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MutualMatch => "mutual_match",
            NotificationType::NewLike => "new_like",
            NotificationType::MatchReminder => "match_reminder",
            NotificationType::ProfileIncomplete => "profile_incomplete",
            NotificationType::Welcome => "welcome",
            NotificationType::System => "system",
            NotificationType::ReengagementGentle => "reengagement_gentle",
            NotificationType::ReengagementUrgent => "reengagement_urgent",
            NotificationType::ReengagementLastChance => "reengagement_last_chance",
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mutual_match" => NotificationType::MutualMatch,
            "new_like" => NotificationType::NewLike,
            "match_reminder" => NotificationType::MatchReminder,
            "profile_incomplete" => NotificationType::ProfileIncomplete,
            "welcome" => NotificationType::Welcome,
            "system" => NotificationType::System,
            "reengagement_gentle" => NotificationType::ReengagementGentle,
            "reengagement_urgent" => NotificationType::ReengagementUrgent,
            "reengagement_last_chance" => NotificationType::ReengagementLastChance,
            other => {
                return Err(crate::error::AppError::Validation(format!(
                    "unknown notification type: {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Email,
    Push,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Sms => "sms",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "telegram" => Channel::Telegram,
            "email" => Channel::Email,
            "push" => Channel::Push,
            "sms" => Channel::Sms,
            other => {
                return Err(crate::error::AppError::Validation(format!(
                    "unknown channel: {other}"
                )))
            }
        })
    }
}

/// Lifecycle state of a notification row. `Processing` is reserved for the
/// reconciler's candidate query; no code path in this build transitions a row
/// into it directly (see the "status=processing" open question in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    Dlq,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Dlq => "dlq",
            NotificationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => NotificationStatus::Pending,
            "processing" => NotificationStatus::Processing,
            "delivered" => NotificationStatus::Delivered,
            "failed" => NotificationStatus::Failed,
            "dlq" => NotificationStatus::Dlq,
            "cancelled" => NotificationStatus::Cancelled,
            other => {
                return Err(crate::error::AppError::Validation(format!(
                    "unknown notification status: {other}"
                )))
            }
        })
    }
}

/// The sender/transport outcome classification. This is the contract boundary
/// between a [`crate::services::sender::Sender`] and the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    UserBlocked,
    NetworkError,
    InvalidPayload,
    ServiceDown,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UserBlocked => "USER_BLOCKED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::ServiceDown => "SERVICE_DOWN",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether the retry policy should schedule another attempt for this
    /// classification. `USER_BLOCKED` and `INVALID_PAYLOAD` are permanent;
    /// everything else is considered transient.
    pub fn should_retry(&self) -> bool {
        !matches!(self, ErrorCode::UserBlocked | ErrorCode::InvalidPayload)
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "RATE_LIMITED" => ErrorCode::RateLimited,
            "USER_BLOCKED" => ErrorCode::UserBlocked,
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "INVALID_PAYLOAD" => ErrorCode::InvalidPayload,
            "SERVICE_DOWN" => ErrorCode::ServiceDown,
            "UNKNOWN" => ErrorCode::Unknown,
            other => {
                return Err(crate::error::AppError::Validation(format!(
                    "unknown error code: {other}"
                )))
            }
        })
    }
}

/// Channel-specific payload block. Exactly one arm is active, matching the
/// notification's `channel`; that invariant is enforced at validation time
/// (see `CreateNotificationRequest::validate`), not at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum NotificationPayload {
    Telegram {
        chat_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parse_mode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_markup: Option<serde_json::Value>,
    },
    Email {
        to: String,
        subject: String,
        body: String,
    },
    Push {
        device_token: String,
        title: String,
        body: String,
    },
    Sms {
        to: String,
        body: String,
    },
}

impl NotificationPayload {
    pub fn channel(&self) -> Channel {
        match self {
            NotificationPayload::Telegram { .. } => Channel::Telegram,
            NotificationPayload::Email { .. } => Channel::Email,
            NotificationPayload::Push { .. } => Channel::Push,
            NotificationPayload::Sms { .. } => Channel::Sms,
        }
    }
}

/// A durable notification row: the single source of truth for delivery state.
#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub notification_type: String,
    pub channel: String,
    pub payload_json: String,
    pub status: String,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
    pub related_match_id: Option<String>,
    pub related_user_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub delivered_at: Option<NaiveDateTime>,
    pub dlq_at: Option<NaiveDateTime>,
}

impl Notification {
    pub fn notification_type(&self) -> Result<NotificationType, crate::error::AppError> {
        self.notification_type.parse()
    }

    pub fn channel(&self) -> Result<Channel, crate::error::AppError> {
        self.channel.parse()
    }

    pub fn status(&self) -> Result<NotificationStatus, crate::error::AppError> {
        self.status.parse()
    }

    pub fn payload(&self) -> Result<NotificationPayload, crate::error::AppError> {
        serde_json::from_str(&self.payload_json)
            .map_err(|e| crate::error::AppError::Validation(format!("invalid payload json: {e}")))
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "delivered" | "dlq" | "cancelled"
        )
    }
}

/// Request to create a new notification, accepted at the `EnqueueNotification` seam.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationRequest {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub channel: Option<Channel>,
    pub priority: Option<i32>,
    pub payload: NotificationPayload,
    pub max_attempts: Option<i32>,
    pub idempotency_key: Option<String>,
    pub related_match_id: Option<String>,
    pub related_user_id: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}

impl CreateNotificationRequest {
    /// Enforce that the payload's active arm matches the requested (or defaulted) channel.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.user_id.trim().is_empty() {
            return Err(crate::error::AppError::Validation(
                "user_id must not be empty".to_string(),
            ));
        }
        let channel = self.channel.unwrap_or(Channel::Telegram);
        if self.payload.channel() != channel {
            return Err(crate::error::AppError::Validation(format!(
                "payload is for channel {:?} but notification channel is {:?}",
                self.payload.channel(),
                channel
            )));
        }
        Ok(())
    }
}
