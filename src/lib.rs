//! HTTP API gateway in front of unix-socket worker pools.
//!
//! ```text
//!   client ──▶ http::server ──▶ plugins::Dispatcher ──▶ plugin routes
//!                                                          │
//!                         auth::AuthGate (bearer token) ◀──┤
//!                                                          ▼
//!   discovery (socket glob) ──▶ manager::ProxyManager ──▶ ProxySlot
//!                                                          │
//!                                    upstream::UpstreamProxy ──▶ worker.sock
//! ```

pub mod auth;
pub mod config;
pub mod discovery;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod observability;
pub mod plugins;
pub mod resilience;
pub mod upstream;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::{Gateway, Shutdown};
