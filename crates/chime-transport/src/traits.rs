//! Transport abstraction traits for Chime.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the dispatcher to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
///
/// Any transport error is terminal for the connection that raised it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the payload of the next data message.
    ///
    /// Control messages (ping/pong) are consumed internally. Returns `None`
    /// once the peer has closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one pre-encoded text frame.
    async fn send(&mut self, text: Arc<str>) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}
