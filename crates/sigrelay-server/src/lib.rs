//! # sigrelay-server
//!
//! Presence and signaling relay for peer-to-peer session setup.
//!
//! - Peer registry and synthetic bot peers for lone visitors
//! - Signal routing by peer id (payloads are never interpreted)
//! - `peer-joined` / `peer-left` / `init` presence events
//! - Axum HTTP boundary: `/status`, `/metrics`, origin policy, WebSocket upgrade
//! - Best-effort Telegram alert when a visitor arrives to an empty relay

#![deny(unsafe_code)]

pub mod bots;
pub mod connection;
pub mod cors;
pub mod error;
pub mod health;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use error::ServerError;
pub use hub::{HubConfig, SignalHub};
pub use server::{RelayServer, ServerHandle};
