//! # chime-protocol
//!
//! Wire protocol definitions for the Chime channels relay.
//!
//! Clients speak a Pusher-style JSON protocol over a persistent connection.
//! Every inbound message is a single JSON object:
//!
//! ```text
//! {"event": "subscribe", "channel": "room-1"}
//! {"event": "client_event", "channel": "room-1", "data": {"x": 1}}
//! ```
//!
//! Inbound objects are decoded into the closed [`InboundFrame`] union, with an
//! explicit `Unrecognized` variant for events the relay does not handle.
//! Outbound frames are always `{"event": ..., "data": ...}`.
//!
//! ## Example
//!
//! ```rust
//! use chime_protocol::{codec, InboundFrame, OutboundFrame};
//!
//! let frame = codec::decode(br#"{"event":"subscribe","channel":"lobby"}"#).unwrap();
//! assert_eq!(frame, InboundFrame::subscribe("lobby"));
//!
//! let text = codec::encode(&OutboundFrame::pong()).unwrap();
//! assert_eq!(&*text, r#"{"event":"pusher:pong","data":{}}"#);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{names, EventKind, InboundFrame, OutboundFrame};
