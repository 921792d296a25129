//! Side-effect interfaces: webhook notification and event logging.
//!
//! Both are fire-and-forget. Implementations must return promptly and must
//! not surface failures to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::connection::ConnectionId;

/// One notification for webhook consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(skip)]
    pub app_id: String,
    pub event: String,
    pub channel: String,
    /// `null` for occupancy transitions.
    pub data: Option<Value>,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        event: impl Into<String>,
        channel: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            event: event.into(),
            channel: channel.into(),
            data,
        }
    }
}

/// A webhook endpoint subscribed to one event of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub app_id: String,
    pub event: String,
    pub url: String,
    /// Sent as a bearer token when non-empty.
    #[serde(default)]
    pub token: String,
}

impl WebhookRegistration {
    /// Whether this registration wants `event` for `app_id`.
    #[must_use]
    pub fn matches(&self, app_id: &str, event: &str) -> bool {
        self.app_id == app_id && self.event == event
    }
}

/// Receives event and occupancy notifications.
pub trait WebhookNotifier: Send + Sync {
    /// Hand off a notification. Must not block.
    fn notify(&self, event: WebhookEvent);
}

/// Observability hook for protocol events.
pub trait LogSink: Send + Sync {
    fn record(&self, app_id: &str, channel: &str, event: &str, connection: ConnectionId);
}

/// [`LogSink`] that writes structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, app_id: &str, channel: &str, event: &str, connection: ConnectionId) {
        info!(
            target: "chime::events",
            app_id = %app_id,
            channel = %channel,
            event = %event,
            connection = %connection,
            "Event"
        );
    }
}
