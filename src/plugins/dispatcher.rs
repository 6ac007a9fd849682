//! Offers each request to the enabled plugins in order.

use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::plugins::{Dispatch, Plugin, PluginContext, PluginError, PluginInfo};

/// Lifecycle of one plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Initialized,
    Serving,
    Closed,
}

/// A plugin with its identity and lifecycle state.
pub struct PluginRecord {
    plugin: Arc<dyn Plugin>,
    info: PluginInfo,
    state: Mutex<PluginState>,
}

impl PluginRecord {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        let info = plugin.info();
        Self {
            plugin,
            info,
            state: Mutex::new(PluginState::Registered),
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn state(&self) -> PluginState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PluginState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn accepts_requests(&self) -> bool {
        matches!(self.state(), PluginState::Initialized | PluginState::Serving)
    }
}

/// Ordered plugin chain.
pub struct Dispatcher {
    records: Vec<PluginRecord>,
}

impl Dispatcher {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            records: plugins.into_iter().map(PluginRecord::new).collect(),
        }
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    /// Initialize every plugin in order, stopping at the first failure.
    pub async fn initialize(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        for record in &self.records {
            let info = record.info();
            record.plugin.initialize(ctx.clone()).await.map_err(|e| match e {
                PluginError::Initialization { .. } => e,
                other => PluginError::Initialization {
                    plugin: info.id.clone(),
                    message: other.to_string(),
                },
            })?;
            record.set_state(PluginState::Initialized);
            tracing::info!(
                plugin = %info.id,
                version = %info.version,
                build_date = %info.build_date,
                "Plugin initialized"
            );
        }
        Ok(())
    }

    /// Mark initialized plugins as serving once the listener is up.
    pub fn start_serving(&self) {
        for record in &self.records {
            if record.state() == PluginState::Initialized {
                record.set_state(PluginState::Serving);
            }
        }
    }

    /// Offer `req` to each plugin until one handles it.
    ///
    /// A plugin error is a 500 for this request only; no taker is a 404.
    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let mut req = req;
        for record in self.records.iter().filter(|r| r.accepts_requests()) {
            match record.plugin.serve_http(req).await {
                Ok(Dispatch::Handled(response)) => return response,
                Ok(Dispatch::Declined(unclaimed)) => req = unclaimed,
                Err(error) => {
                    tracing::error!(plugin = %record.info.id, error = %error, "Plugin failed to serve request");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
        StatusCode::NOT_FOUND.into_response()
    }

    /// Close every plugin that was initialized. Errors are logged.
    pub async fn close(&self) {
        for record in &self.records {
            if matches!(record.state(), PluginState::Registered | PluginState::Closed) {
                continue;
            }
            if let Err(error) = record.plugin.close().await {
                tracing::error!(plugin = %record.info.id, error = %error, "Plugin close failed");
            }
            record.set_state(PluginState::Closed);
            tracing::debug!(plugin = %record.info.id, "Plugin closed");
        }
    }
}
