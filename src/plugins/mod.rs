//! Feature plugins.
//!
//! # Data Flow
//! ```text
//! registry.rs (compile-time constructor table, enable list)
//!     → dispatcher.rs (ordered PluginRecords, lifecycle state)
//!         → Plugin::initialize(PluginContext)
//!         → Plugin::serve_http per request until one claims it
//!         → Plugin::close on shutdown
//!
//! services.rs (GatewayServices) is handed to every plugin:
//!     require_token → auth::AuthGate
//!     bind_proxy    → manager::ProxySlot → upstream::UpstreamProxy
//! ```
//!
//! # Design Decisions
//! - A declined request is handed back, so the next plugin sees it untouched
//! - Plugin background work runs on the plugin's own task tracker and stops
//!   before `close` returns

pub mod dispatcher;
pub mod example;
pub mod groupware;
pub mod registry;
pub mod services;

use std::fmt;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use dispatcher::{Dispatcher, PluginRecord, PluginState};
pub use registry::PluginRegistry;
pub use services::GatewayServices;

/// Identity of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: String,
    pub version: String,
    pub build_date: String,
}

impl PluginInfo {
    /// Info stamped with this crate's version.
    pub fn builtin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: option_env!("GATEWAY_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Outcome of offering a request to a plugin.
pub enum Dispatch {
    Handled(Response),
    /// The plugin does not serve this request; it is handed back unconsumed.
    Declined(Request<Body>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Handled(response) => f.debug_tuple("Handled").field(&response.status()).finish(),
            Dispatch::Declined(request) => f.debug_tuple("Declined").field(request.uri()).finish(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {plugin} failed to initialize: {message}")]
    Initialization { plugin: String, message: String },

    /// Failure while serving one request.
    #[error("{0}")]
    Runtime(String),

    /// Asynchronous fault; fatal for the gateway.
    #[error("plugin {plugin} failed: {message}")]
    Background { plugin: String, message: String },
}

/// Everything a plugin receives at initialization.
#[derive(Clone)]
pub struct PluginContext {
    /// Cancelled once the gateway shuts down.
    pub cancel: CancellationToken,
    /// Channel for asynchronous faults.
    pub errors: mpsc::Sender<PluginError>,
    pub services: GatewayServices,
}

impl PluginContext {
    /// Report a background fault without blocking.
    pub fn report(&self, error: PluginError) {
        if let Err(e) = self.errors.try_send(error) {
            tracing::error!(error = %e, "Failed to report plugin error");
        }
    }
}

/// A feature plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    async fn initialize(&self, ctx: PluginContext) -> Result<(), PluginError>;

    /// Stop background work. In-flight requests are not waited for.
    async fn close(&self) -> Result<(), PluginError>;

    async fn serve_http(&self, req: Request<Body>) -> Result<Dispatch, PluginError>;
}
