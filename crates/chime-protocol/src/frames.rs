//! Frame types for the Chime protocol.
//!
//! Inbound frames arrive as loosely-shaped JSON objects. They are narrowed into
//! [`InboundFrame`], a closed union over the events the relay understands, so
//! dispatch stays exhaustive while unknown events are still tolerated.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::codec::ProtocolError;

/// Event names used on the wire and in notifications.
pub mod names {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const PUSHER_SUBSCRIBE: &str = "pusher:subscribe";
    pub const PUSHER_UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const CLIENT_EVENT: &str = "client_event";
    pub const CLIENT_EVENT_PREFIX: &str = "client-";
    pub const MEMBER_ADDED: &str = "member_added";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const ERROR: &str = "pusher:error";
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

    // Lifecycle notifications.
    pub const CHANNEL_OCCUPIED: &str = "channel_occupied";
    pub const CHANNEL_VACATED: &str = "channel_vacated";
    pub const CONNECTION: &str = "connection";
    pub const DISCONNECTION: &str = "disconnection";
}

/// Seconds a client may stay silent before it should ping.
pub const ACTIVITY_TIMEOUT_SECS: u32 = 120;

/// Classification of an inbound event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
    ClientEvent,
    MemberAdded,
    MemberRemoved,
    Ping,
    Unrecognized,
}

impl EventKind {
    /// Classify an event name. Pusher-prefixed aliases map to the same kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            names::SUBSCRIBE | names::PUSHER_SUBSCRIBE => EventKind::Subscribe,
            names::UNSUBSCRIBE | names::PUSHER_UNSUBSCRIBE => EventKind::Unsubscribe,
            names::CLIENT_EVENT => EventKind::ClientEvent,
            names::MEMBER_ADDED => EventKind::MemberAdded,
            names::MEMBER_REMOVED => EventKind::MemberRemoved,
            names::PING => EventKind::Ping,
            n if n.starts_with(names::CLIENT_EVENT_PREFIX) => EventKind::ClientEvent,
            _ => EventKind::Unrecognized,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Join a channel.
    Subscribe { channel: String },

    /// Leave a channel.
    Unsubscribe { channel: String },

    /// Relay `data` to every subscriber of `channel`.
    ClientEvent {
        /// Event name as sent by the client (`client_event` or `client-*`).
        event: String,
        channel: String,
        data: Map<String, Value>,
    },

    /// Presence join notice, relayed to webhooks only.
    MemberAdded {
        channel: String,
        data: Map<String, Value>,
    },

    /// Presence leave notice, relayed to webhooks only.
    MemberRemoved {
        channel: String,
        data: Map<String, Value>,
    },

    /// Keepalive.
    Ping,

    /// Any event the relay does not act on.
    Unrecognized { event: String },
}

impl InboundFrame {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundFrame::Subscribe { .. } => EventKind::Subscribe,
            InboundFrame::Unsubscribe { .. } => EventKind::Unsubscribe,
            InboundFrame::ClientEvent { .. } => EventKind::ClientEvent,
            InboundFrame::MemberAdded { .. } => EventKind::MemberAdded,
            InboundFrame::MemberRemoved { .. } => EventKind::MemberRemoved,
            InboundFrame::Ping => EventKind::Ping,
            InboundFrame::Unrecognized { .. } => EventKind::Unrecognized,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        InboundFrame::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        InboundFrame::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a new `client_event` frame.
    #[must_use]
    pub fn client_event(channel: impl Into<String>, data: Map<String, Value>) -> Self {
        InboundFrame::ClientEvent {
            event: names::CLIENT_EVENT.to_string(),
            channel: channel.into(),
            data,
        }
    }
}

/// Wire shape of an inbound message. Extra fields are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct RawFrame {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RawFrame {
    /// Channel from the top level, or from `data.channel` as Pusher clients send it.
    fn membership_channel(&self) -> Option<String> {
        self.channel.clone().or_else(|| {
            self.data
                .as_ref()
                .and_then(|d| d.get("channel"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
    }

    fn require_channel(&self) -> Result<String, ProtocolError> {
        self.channel.clone().ok_or_else(|| self.missing("channel"))
    }

    fn require_object(&mut self) -> Result<Map<String, Value>, ProtocolError> {
        match self.data.take() {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(ProtocolError::InvalidField {
                event: self.event.clone(),
                field: "data",
                expected: "an object",
            }),
            None => Err(self.missing("data")),
        }
    }

    fn missing(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            event: self.event.clone(),
            field,
        }
    }
}

impl TryFrom<RawFrame> for InboundFrame {
    type Error = ProtocolError;

    fn try_from(mut raw: RawFrame) -> Result<Self, Self::Error> {
        let frame = match EventKind::from_name(&raw.event) {
            EventKind::Subscribe => InboundFrame::Subscribe {
                channel: raw.membership_channel().ok_or_else(|| raw.missing("channel"))?,
            },
            EventKind::Unsubscribe => InboundFrame::Unsubscribe {
                channel: raw.membership_channel().ok_or_else(|| raw.missing("channel"))?,
            },
            EventKind::ClientEvent => {
                let channel = raw.require_channel()?;
                let data = raw.require_object()?;
                InboundFrame::ClientEvent {
                    event: raw.event,
                    channel,
                    data,
                }
            }
            EventKind::MemberAdded => {
                let channel = raw.require_channel()?;
                InboundFrame::MemberAdded {
                    channel,
                    data: raw.require_object()?,
                }
            }
            EventKind::MemberRemoved => {
                let channel = raw.require_channel()?;
                InboundFrame::MemberRemoved {
                    channel,
                    data: raw.require_object()?,
                }
            }
            EventKind::Ping => InboundFrame::Ping,
            EventKind::Unrecognized => InboundFrame::Unrecognized { event: raw.event },
        };
        Ok(frame)
    }
}

/// An outbound frame. The target channel is implied by delivery scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: Value,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Create the greeting sent right after the upgrade.
    #[must_use]
    pub fn connection_established(socket_id: impl Into<String>) -> Self {
        Self::new(
            names::CONNECTION_ESTABLISHED,
            json!({
                "socket_id": socket_id.into(),
                "activity_timeout": ACTIVITY_TIMEOUT_SECS,
            }),
        )
    }

    /// Create a subscription confirmation.
    #[must_use]
    pub fn subscription_succeeded(channel: impl Into<String>) -> Self {
        Self::new(
            names::SUBSCRIPTION_SUCCEEDED,
            json!({ "channel": channel.into() }),
        )
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(names::PONG, Value::Object(Map::new()))
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::new(
            names::ERROR,
            json!({ "code": code, "message": message.into() }),
        )
    }
}
