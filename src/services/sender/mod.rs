//! The sender registry and `Sender` contract (C4).
//!
//! `Sender` is the capability boundary between the orchestrator and a
//! channel-specific transport: `Channel()` plus a fallible `send` that
//! classifies its own outcome into the shared `ErrorCode` taxonomy. Adding a
//! channel means adding a `Sender` impl, not touching the retry policy.

pub mod telegram;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::models::{Channel, ErrorCode, Notification};

#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub error_code: ErrorCode,
    pub error: Option<String>,
    pub response_data: Option<Value>,
}

impl SendResult {
    pub fn ok(response_data: Option<Value>) -> Self {
        Self {
            success: true,
            error_code: ErrorCode::Unknown,
            error: None,
            response_data,
        }
    }

    pub fn failure(error_code: ErrorCode, error: impl Into<String>, response_data: Option<Value>) -> Self {
        Self {
            success: false,
            error_code,
            error: Some(error.into()),
            response_data,
        }
    }
}

#[async_trait]
pub trait Sender: Send + Sync {
    fn channel(&self) -> Channel;
    async fn send(&self, notification: &Notification) -> SendResult;
}

/// Channel -> sender lookup, populated once at startup and treated as
/// immutable thereafter; no synchronization is needed on the hot path.
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn Sender>> {
        self.senders.get(&channel).cloned()
    }
}
