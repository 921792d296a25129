//! Connection registry for Chime.
//!
//! The registry is the single authority over channel membership. It keeps two
//! mirrored indexes, channel → subscribers and connection → channels, behind
//! one reader/writer lock: every mutation updates both under the write lock,
//! while broadcasts fan out under the read lock.

use crate::channel::{validate_channel_name, Channel, ChannelId};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection was never registered or has been purged.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,
}

impl RegistryError {
    /// Error code reported to the client in a `pusher:error` frame.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RegistryError::InvalidChannel(_) => 4300,
            RegistryError::MaxSubscriptionsReached => 4301,
            RegistryError::UnknownConnection(_) => 4302,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 100,
        }
    }
}

/// A registered connection and the channels it belongs to.
struct ConnectionEntry {
    handle: ConnectionHandle,
    channels: HashSet<ChannelId>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Only channels with at least one subscriber are present.
    channels: HashMap<ChannelId, Channel>,
}

impl RegistryState {
    /// Remove `id` from `channel` in both indexes.
    ///
    /// Returns `None` if `id` was not a member, otherwise whether this
    /// emptied the channel.
    fn detach(&mut self, id: ConnectionId, channel_name: &str) -> Option<bool> {
        let channel = self.channels.get_mut(channel_name)?;
        if !channel.unsubscribe(id) {
            return None;
        }
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.channels.remove(channel_name);
        }
        if channel.is_empty() {
            self.channels.remove(channel_name);
            debug!(channel = %channel_name, "Deleted empty channel");
            return Some(true);
        }
        Some(false)
    }
}

/// Thread-safe tracker of live connections, channel membership and occupancy.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating connection registry with config: {:?}", config);
        Self {
            state: RwLock::new(RegistryState::default()),
            config,
        }
    }

    /// Register a connection with an empty subscription set.
    ///
    /// Returns `false` if the connection was already registered, in which case
    /// nothing changes.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let id = handle.id();
        let mut state = self.state.write();
        if state.connections.contains_key(&id) {
            return false;
        }
        state.connections.insert(
            id,
            ConnectionEntry {
                handle,
                channels: HashSet::new(),
            },
        );
        debug!(connection = %id, "Registered connection");
        true
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Subscribe a connection to a channel.
    ///
    /// Returns `true` only when this subscription took the channel from zero
    /// to one subscriber. Subscribing twice is a no-op that returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid, the connection is not
    /// registered, or its subscription limit is reached.
    pub fn subscribe(&self, id: ConnectionId, channel_name: &str) -> Result<bool, RegistryError> {
        validate_channel_name(channel_name).map_err(RegistryError::InvalidChannel)?;

        let mut guard = self.state.write();
        let state = &mut *guard;

        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        if entry.channels.contains(channel_name) {
            trace!(channel = %channel_name, connection = %id, "Already subscribed");
            return Ok(false);
        }
        if entry.channels.len() >= self.config.max_subscriptions_per_connection {
            return Err(RegistryError::MaxSubscriptionsReached);
        }
        entry.channels.insert(channel_name.to_string());

        let channel = state
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_name, "Creating new channel");
                Channel::new(channel_name)
            });
        channel.subscribe(id);
        metrics::record_subscription_added();

        let became_occupied = channel.subscriber_count() == 1;
        debug!(
            channel = %channel_name,
            connection = %id,
            subscribers = channel.subscriber_count(),
            "Subscribed"
        );
        if became_occupied {
            metrics::record_occupancy_transition("occupied");
        }
        Ok(became_occupied)
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// Returns `true` only when this removed the channel's last subscriber.
    /// Removing a membership that does not exist is a no-op.
    pub fn unsubscribe(&self, id: ConnectionId, channel_name: &str) -> bool {
        let Some(became_vacated) = self.state.write().detach(id, channel_name) else {
            return false;
        };
        metrics::record_subscriptions_removed(1);
        if became_vacated {
            metrics::record_occupancy_transition("vacated");
        }
        became_vacated
    }

    /// Remove a connection from every channel and drop its entry.
    ///
    /// Returns the channels this emptied, or `None` if the connection was not
    /// registered (never seen, or already purged).
    pub fn purge_connection(&self, id: ConnectionId) -> Option<Vec<ChannelId>> {
        let mut state = self.state.write();
        let entry = state.connections.get(&id)?;

        let channels: Vec<ChannelId> = entry.channels.iter().cloned().collect();
        let removed = channels.len();
        let vacated: Vec<ChannelId> = channels
            .into_iter()
            .filter(|name| state.detach(id, name) == Some(true))
            .collect();
        state.connections.remove(&id);
        drop(state);

        metrics::record_subscriptions_removed(removed);
        for _ in &vacated {
            metrics::record_occupancy_transition("vacated");
        }
        debug!(connection = %id, vacated = vacated.len(), "Purged connection");
        Some(vacated)
    }

    /// Deliver a payload to every current subscriber of a channel.
    ///
    /// A subscriber whose queue is full or closed is asked to disconnect; the
    /// failure never reaches the caller or other subscribers. Returns the
    /// number of subscribers the payload was queued for.
    pub fn broadcast(&self, channel_name: &str, payload: Arc<str>) -> usize {
        let state = self.state.read();
        let Some(channel) = state.channels.get(channel_name) else {
            trace!(channel = %channel_name, "Broadcast to empty channel");
            return 0;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for id in channel.subscribers() {
            let Some(entry) = state.connections.get(&id) else {
                continue;
            };
            if entry.handle.try_deliver(Arc::clone(&payload)) {
                delivered += 1;
            } else {
                failed += 1;
                warn!(
                    channel = %channel_name,
                    connection = %id,
                    "Broadcast delivery failed, closing connection"
                );
            }
        }

        metrics::record_broadcast(delivered, failed);
        trace!(channel = %channel_name, recipients = delivered, "Broadcast");
        delivered
    }

    /// Get the occupancy of a channel.
    #[must_use]
    pub fn occupancy(&self, channel_name: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel_name)
            .map(Channel::subscriber_count)
            .unwrap_or(0)
    }

    /// Get the subscribers of a channel.
    #[must_use]
    pub fn subscribers(&self, channel_name: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .channels
            .get(channel_name)
            .map(|c| c.subscribers().collect())
            .unwrap_or_default()
    }

    /// Get the channels a connection is subscribed to.
    #[must_use]
    pub fn connection_channels(&self, id: ConnectionId) -> Vec<ChannelId> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|e| e.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            channel_count: state.channels.len(),
            connection_count: state.connections.len(),
            total_subscriptions: state.connections.values().map(|e| e.channels.len()).sum(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of occupied channels.
    pub channel_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
