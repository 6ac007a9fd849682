//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router: `/health-check` plus the plugin dispatcher
//! - Wire up middleware (tracing, request ID, request counter)
//! - Serve until shutdown, draining in-flight requests for a grace period

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::ProviderError;
use crate::config::{ConfigError, GatewayConfig};
use crate::lifecycle::shutdown;
use crate::observability::logging::LoggingError;
use crate::observability::metrics;
use crate::plugins::{Dispatcher, PluginError};

pub const HEALTH_CHECK_PATH: &str = "/health-check";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("identity provider: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// HTTP front of the gateway.
pub struct GatewayServer {
    router: Router,
    grace: Duration,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            router: Self::build_router(dispatcher),
            grace: config.timeouts.shutdown_grace(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .route(HEALTH_CHECK_PATH, any(health_check))
            .fallback(dispatch)
            .with_state(dispatcher)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(middleware::from_fn(metrics::track_requests)),
            )
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// The first signal stops accepting and waits up to the grace period for
    /// in-flight requests. A second signal returns immediately.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain_rx.await;
            })
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                result?;
                tracing::info!("HTTP server stopped");
                return Ok(());
            }
            _ = shutdown::triggered(&mut shutdown) => {}
        }

        tracing::info!(grace = ?self.grace, "Draining in-flight requests");
        let _ = drain_tx.send(());

        tokio::select! {
            result = &mut serve => {
                result?;
                tracing::info!("HTTP server stopped");
            }
            _ = shutdown::triggered(&mut shutdown) => {
                tracing::warn!("Forced shutdown, abandoning in-flight requests");
            }
            _ = tokio::time::sleep(self.grace) => {
                tracing::warn!(grace = ?self.grace, "Grace period elapsed, abandoning in-flight requests");
            }
        }
        Ok(())
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, req: Request<Body>) -> Response {
    dispatcher.dispatch(req).await
}
