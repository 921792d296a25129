//! # chime-core
//!
//! Core of the Chime channels relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - live connections, channel membership, occupancy
//! - **Dispatcher** - the per-connection protocol loop
//! - **CredentialCache** - cache-aside resolution of application credentials
//! - **WebhookNotifier / LogSink** - fire-and-forget side-effect interfaces
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────┐     ┌──────────────────────┐
//! │ CredentialCache │────▶│ Dispatcher  │────▶│  ConnectionRegistry  │
//! └─────────────────┘     └─────────────┘     └──────────────────────┘
//!         │                      │
//!         ▼                      ▼
//! ┌─────────────────┐     ┌─────────────────────────┐
//! │ CredentialStore │     │ WebhookNotifier/LogSink │
//! └─────────────────┘     └─────────────────────────┘
//! ```

pub mod cache;
pub mod channel;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod metrics;
pub mod notify;
pub mod registry;

pub use cache::MemoryCache;
pub use channel::{Channel, ChannelId};
pub use connection::{ConnectionHandle, ConnectionId};
pub use credentials::{
    CacheBackend, CacheError, Credential, CredentialCache, CredentialStore, ResolveError,
    StoreError, CREDENTIAL_TTL,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, SessionState};
pub use notify::{LogSink, TracingLogSink, WebhookEvent, WebhookNotifier, WebhookRegistration};
pub use registry::{ConnectionRegistry, RegistryConfig, RegistryError, RegistryStats};
