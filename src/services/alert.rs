//! The alert sink: a Sentry/GlitchTip-shaped seam the core calls into on
//! permanent failures and DLQ health checks. No vendor SDK is wired in here
//! (out of scope per spec.md §1) but the contract — tags, user, extras,
//! breadcrumbs, severity — is real so a Sentry-backed `AlertSink` can be
//! dropped in later without touching the call sites.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub message: String,
    pub level: AlertLevel,
    pub tags: HashMap<String, String>,
    pub user: Option<String>,
    pub extras: HashMap<String, serde_json::Value>,
    pub breadcrumb_category: Option<String>,
}

pub trait AlertSink: Send + Sync {
    fn capture_message(&self, event: AlertEvent);
}

/// Default sink: routes events through `tracing` at the matching level and
/// logs a breadcrumb line. Swap in a Sentry-backed impl without touching
/// callers.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn capture_message(&self, event: AlertEvent) {
        match event.level {
            AlertLevel::Error => tracing::error!(
                tags = ?event.tags,
                user = ?event.user,
                extras = ?event.extras,
                "{}",
                event.message
            ),
            AlertLevel::Warning => tracing::warn!(
                tags = ?event.tags,
                user = ?event.user,
                extras = ?event.extras,
                "{}",
                event.message
            ),
        }
        if let Some(category) = event.breadcrumb_category {
            tracing::debug!(category = %category, "breadcrumb: {}", event.message);
        }
    }
}
