//! # chime-transport
//!
//! Transport abstraction layer for the Chime relay.
//!
//! A live connection is split into a [`FrameReader`] half, polled by the
//! connection's dispatch loop, and a [`FrameWriter`] half, driven by a
//! dedicated writer task. Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`)
//! - **Memory** - in-process channels, for tests
//!
//! ```rust,ignore
//! use chime_transport::{FrameReader, FrameWriter};
//!
//! async fn echo(mut reader: impl FrameReader, mut writer: impl FrameWriter) {
//!     while let Ok(Some(payload)) = reader.recv().await {
//!         let text = String::from_utf8_lossy(&payload);
//!         if writer.send(text.into()).await.is_err() {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError};
