//! Connection identity and outbound handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Monotonic source of connection identifiers.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a live connection.
///
/// Identifiers come from a counter and are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw counter value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Render as a Pusher-style socket id (`<pid>.<n>`).
    ///
    /// This is also the `Display` form, so log lines carry the id the
    /// client was given.
    #[must_use]
    pub fn socket_id(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", std::process::id(), self.0)
    }
}

/// The registry's view of a connection: where to put outbound frames and how
/// to ask the connection to shut down.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Arc<str>>,
    closer: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle with a freshly allocated id.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: ConnectionId::next(),
            outbound,
            closer: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Signal that fires when the connection should be torn down.
    #[must_use]
    pub fn closer(&self) -> Arc<Notify> {
        Arc::clone(&self.closer)
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the connection is gone; in that
    /// case the connection is asked to close.
    pub fn try_deliver(&self, payload: Arc<str>) -> bool {
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(_) => {
                self.close();
                false
            }
        }
    }

    /// Ask the owning connection task to shut down. Idempotent.
    pub fn close(&self) {
        // notify_one stores a permit, so a signal sent before the task
        // starts waiting is not lost.
        self.closer.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(a.socket_id().ends_with(&format!(".{}", a.as_u64())));
    }

    #[test]
    fn test_display_matches_socket_id() {
        let id = ConnectionId::next();
        assert_eq!(id.to_string(), id.socket_id());
        assert_eq!(
            id.to_string(),
            format!("{}.{}", std::process::id(), id.as_u64())
        );
    }

    #[tokio::test]
    async fn test_try_deliver_full_queue_requests_close() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);
        let closer = handle.closer();

        assert!(handle.try_deliver(Arc::from("one")));
        assert!(!handle.try_deliver(Arc::from("two")));

        // The stored permit resolves immediately.
        closer.notified().await;
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
    }
}
