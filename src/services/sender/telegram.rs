//! The only implemented channel sender today; its classification table is
//! the contract future channels (email/push/SMS) must also satisfy.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::{ApiError, RequestError};

use crate::db::models::{Channel, ErrorCode, Notification, NotificationPayload};
use crate::services::sender::{SendResult, Sender};

pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(token: String, request_timeout: Duration) -> Self {
        tracing::info!(bot_token = %mask_token(&token), "initializing telegram sender");
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build telegram http client");
        Self {
            bot: Bot::with_client(token, client),
        }
    }
}

/// Never log the raw bot token; first 5 chars + ellipsis for diagnostics.
fn mask_token(token: &str) -> String {
    if token.len() <= 5 {
        "*****".to_string()
    } else {
        format!("{}...", &token[..5])
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, notification: &Notification) -> SendResult {
        let payload = match notification.payload() {
            Ok(p) => p,
            Err(e) => return SendResult::failure(ErrorCode::InvalidPayload, e.to_string(), None),
        };

        let (chat_id_str, text, parse_mode, _reply_markup) = match payload {
            NotificationPayload::Telegram {
                chat_id,
                text,
                parse_mode,
                reply_markup,
            } => (chat_id, text, parse_mode, reply_markup),
            other => {
                return SendResult::failure(
                    ErrorCode::InvalidPayload,
                    format!("payload is for channel {:?}, not telegram", other.channel()),
                    None,
                )
            }
        };

        let chat_id: i64 = match chat_id_str.parse() {
            Ok(v) => v,
            Err(_) => {
                return SendResult::failure(ErrorCode::InvalidPayload, "invalid chat_id", None)
            }
        };

        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(mode) = parse_mode.as_deref() {
            request = match mode {
                "HTML" => request.parse_mode(ParseMode::Html),
                "Markdown" | "MarkdownV2" => request.parse_mode(ParseMode::MarkdownV2),
                _ => request,
            };
        }
        // reply_markup is forwarded opaquely per spec; teloxide's typed keyboard
        // builders aren't modeled here since the core never inspects its contents.

        match request.await {
            Ok(msg) => SendResult::ok(Some(json!({ "message_id": msg.id.0 }))),
            Err(err) => classify_error(&err),
        }
    }
}

fn classify_error(err: &RequestError) -> SendResult {
    match err {
        RequestError::Network(e) if e.is_timeout() => {
            SendResult::failure(ErrorCode::NetworkError, err.to_string(), None)
        }
        RequestError::Network(e) if e.is_connect() => {
            SendResult::failure(ErrorCode::ServiceDown, err.to_string(), None)
        }
        RequestError::Network(_) => SendResult::failure(ErrorCode::NetworkError, err.to_string(), None),
        RequestError::RetryAfter(_) => SendResult::failure(ErrorCode::RateLimited, err.to_string(), None),
        RequestError::Api(api_err) => classify_api_error(api_err, err.to_string()),
        other => SendResult::failure(ErrorCode::Unknown, other.to_string(), None),
    }
}

fn classify_api_error(api_err: &ApiError, message: String) -> SendResult {
    let code = match api_err {
        ApiError::BotBlocked | ApiError::UserDeactivated | ApiError::ChatNotFound => {
            ErrorCode::UserBlocked
        }
        ApiError::InvalidToken => ErrorCode::InvalidPayload,
        ApiError::Unknown(text) => classify_unknown_text(text),
        _ => ErrorCode::InvalidPayload,
    };
    SendResult::failure(code, message, None)
}

fn classify_unknown_text(text: &str) -> ErrorCode {
    let lower = text.to_lowercase();
    if lower.contains("chat not found")
        || lower.contains("user not found")
        || lower.contains("bot was blocked")
        || lower.contains("user is deactivated")
        || lower.contains("forbidden")
    {
        ErrorCode::UserBlocked
    } else if lower.contains("429") || lower.contains("too many requests") {
        ErrorCode::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorCode::NetworkError
    } else if lower.contains("500") || lower.contains("502") || lower.contains("503") {
        ErrorCode::ServiceDown
    } else {
        ErrorCode::Unknown
    }
}
