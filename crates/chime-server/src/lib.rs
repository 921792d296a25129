//! # chime-server
//!
//! HTTP and WebSocket front end for the Chime channels relay.
//!
//! The server accepts upgrades on `/app/{key}`, resolves the application
//! key to a credential and hands the socket to the core dispatcher. It also
//! provides the production collaborators: a SQLite credential store, a Redis
//! cache and an HTTP webhook dispatcher.

pub mod cache;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod storage;
pub mod webhook;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
