//! Gateway facilities offered to plugins.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::IntoResponse;

use crate::auth::AuthGate;
use crate::config::GatewayConfig;
use crate::http::handler::{self, handler_fn, Handler};
use crate::manager::ProxySlot;

#[derive(Clone)]
pub struct GatewayServices {
    config: Arc<GatewayConfig>,
    auth: AuthGate,
    span: tracing::Span,
}

impl GatewayServices {
    pub fn new(config: Arc<GatewayConfig>, auth: AuthGate) -> Self {
        Self {
            config,
            auth,
            span: tracing::info_span!("gateway"),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Parent span for plugin logging.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// Wrap `next` with bearer token enforcement.
    pub fn require_token(&self, next: Handler, required_scopes: Vec<String>) -> Handler {
        self.auth.require_token(next, required_scopes)
    }

    /// Forward requests to the proxy currently installed in `slot`.
    ///
    /// While the slot is empty requests go to `fallback`. Proxy errors become
    /// their status code with an empty body.
    pub fn bind_proxy(&self, slot: Arc<ProxySlot>, fallback: Handler) -> Handler {
        handler_fn(move |req: Request<Body>| {
            let slot = slot.clone();
            let fallback = fallback.clone();
            async move {
                let Some(proxy) = slot.current() else {
                    return handler::call(&fallback, req).await;
                };
                match proxy.serve(req).await {
                    Ok(response) => response,
                    Err(error) => {
                        tracing::error!(proxy = %proxy.name(), error = %error, "Proxy request failed");
                        error.status().into_response()
                    }
                }
            }
        })
    }
}
