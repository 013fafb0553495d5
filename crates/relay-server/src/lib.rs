//! # relay-server
//!
//! Axum HTTP + `WebSocket` server for the comment relay.
//!
//! - [`websocket::registry`]: the live set of subscribers
//! - [`websocket::broadcast`]: fan-out of one serialized message to every subscriber
//! - [`session_manager`]: the single active upstream session and its event wiring
//! - [`websocket::dispatcher`]: control requests (`connect`, `disconnect`) from subscribers
//! - [`websocket::session`]: per-connection loop with heartbeat
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod session_manager;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::RelayServer;
pub use session_manager::{ConnectOutcome, SessionManager, SessionState, SessionStatus};
