//! Channel abstraction for Chime.
//!
//! A channel exists only while it has subscribers; it is nothing more than a
//! name and a subscriber set.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 164;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// Names are 1 to 164 bytes of `[A-Za-z0-9_\-=@,.;]`.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-=@,.;".contains(c))
    {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// A channel and its current subscribers.
#[derive(Debug)]
pub struct Channel {
    name: ChannelId,
    subscribers: HashSet<ConnectionId>,
}

impl Channel {
    /// Create a new, empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers (the channel's occupancy).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: ConnectionId) -> bool {
        self.subscribers.contains(&connection_id)
    }

    /// Add a subscriber.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub fn subscribe(&mut self, connection_id: ConnectionId) -> bool {
        let added = self.subscribers.insert(connection_id);
        if added {
            debug!(channel = %self.name, connection = %connection_id, "Connection subscribed");
        }
        added
    }

    /// Remove a subscriber.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, connection_id: ConnectionId) -> bool {
        let removed = self.subscribers.remove(&connection_id);
        if removed {
            debug!(channel = %self.name, connection = %connection_id, "Connection unsubscribed");
        }
        removed
    }

    /// Iterate over subscriber ids.
    pub fn subscribers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Check if the channel is empty (no subscribers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let channel = Channel::new("room-1");
        assert_eq!(channel.name(), "room-1");
        assert_eq!(channel.subscriber_count(), 0);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_channel_subscribe_unsubscribe() {
        let mut channel = Channel::new("test");
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        assert!(channel.subscribe(a));
        assert!(!channel.subscribe(a));
        assert_eq!(channel.subscriber_count(), 1);
        assert!(channel.is_subscribed(a));

        assert!(channel.subscribe(b));
        assert_eq!(channel.subscriber_count(), 2);

        assert!(channel.unsubscribe(a));
        assert_eq!(channel.subscriber_count(), 1);
        assert!(!channel.is_subscribed(a));

        // Unsubscribing non-existent connection
        assert!(!channel.unsubscribe(a));
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("private-room;1").is_ok());
        assert!(validate_channel_name("presence-chat@lobby=1,2.3").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("has space").is_err());
        assert!(validate_channel_name("$system").is_err());
        assert!(validate_channel_name("caf\u{e9}").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }
}
