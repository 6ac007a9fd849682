//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace span, request counter)
//!     → /health-check, or the plugin dispatcher for everything else
//!     → plugin handlers composed from handler.rs building blocks
//! ```

pub mod handler;
pub mod server;

pub use handler::Handler;
pub use server::{GatewayServer, ServerError};
