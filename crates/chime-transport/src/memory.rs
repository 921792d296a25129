//! In-memory transport.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`MemoryClient`] that plays the remote peer.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError};

type Inbound = Result<Bytes, TransportError>;

/// Create a connected client and server-side reader/writer.
#[must_use]
pub fn pair() -> (MemoryClient, MemoryReader, MemoryWriter) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    (
        MemoryClient {
            inbound: Some(in_tx),
            outbound: Some(out_rx),
        },
        MemoryReader { rx: in_rx },
        MemoryWriter { tx: Some(out_tx) },
    )
}

/// The remote end of an in-memory connection.
pub struct MemoryClient {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: Option<mpsc::UnboundedReceiver<Arc<str>>>,
}

impl MemoryClient {
    /// Send a text message to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the client closed or the server dropped its reader.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let tx = self
            .inbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(Bytes::from(text.into())))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make the server's next read fail with a transport error.
    pub fn abort(&mut self) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Err(TransportError::ReceiveFailed("aborted".into())));
        }
    }

    /// Close the client side; the server reads a clean end of stream.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Stop reading: every later server write fails.
    pub fn stop_reading(&mut self) {
        self.outbound = None;
    }

    /// Wait for the next frame from the server.
    ///
    /// Returns `None` once the server has closed its writer.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.outbound.as_mut()?.recv().await
    }

    /// Take the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.outbound.as_mut()?.try_recv().ok()
    }
}

/// Server-side inbound half.
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// Server-side outbound half.
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Arc<str>>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, text: Arc<str>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}
