//! Groupware API plugin.
//!
//! # Data Flow
//! ```text
//! /api/gc/v1/subscriptions… ─┐
//!                            ├─▶ [cors] → require_token(scopes) → identity → notify slot
//! /api/gc/v1/…             ──┴─▶ [cors] → require_token(scopes) → identity → rest slot
//!
//! /api/gc/v0/… (optional)  ──▶ rewritten to v1, token required, no scopes
//! ```
//!
//! Each slot is filled by its own `ProxyManager` watching the socket
//! directory. Until a slot is filled its requests are answered with 502.
//! A socket directory is required; without one initialization fails.

pub mod identity;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{Request, StatusCode, Uri};
use axum::response::IntoResponse;
use tower::util::BoxCloneSyncService;
use tower::Layer;
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::GroupwareConfig;
use crate::http::handler::{self, handler_fn, Handler};
use crate::manager::{ManagerSettings, ProxyManager, ProxySlot};
use crate::plugins::{Dispatch, GatewayServices, Plugin, PluginContext, PluginError, PluginInfo};
use crate::upstream::{Policy, ProxyConfiguration, StickyRule};

const V1_PREFIX: &str = "/api/gc/v1/";
const V0_PREFIX: &str = "/api/gc/v0/";
const SUBSCRIPTIONS: &str = "subscriptions";

/// Which worker pool serves a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    Rest,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    api: Api,
    legacy: bool,
}

fn route(path: &str, enable_v0: bool) -> Option<Route> {
    let (rest, legacy) = if let Some(rest) = path.strip_prefix(V1_PREFIX) {
        (rest, false)
    } else if let Some(rest) = path.strip_prefix(V0_PREFIX).filter(|_| enable_v0) {
        (rest, true)
    } else {
        return None;
    };
    let api = if rest.starts_with(SUBSCRIPTIONS) {
        Api::Notify
    } else {
        Api::Rest
    };
    Some(Route { api, legacy })
}

/// Map a legacy path onto its v1 equivalent, keeping the query.
fn rewrite_legacy(uri: &Uri) -> Result<Uri, PluginError> {
    let mut parts = uri.clone().into_parts();
    let rewritten = match &parts.path_and_query {
        Some(pq) => pq.as_str().replacen(V0_PREFIX, V1_PREFIX, 1),
        None => return Err(PluginError::Runtime("legacy request without path".into())),
    };
    parts.path_and_query =
        Some(PathAndQuery::from_str(&rewritten).map_err(|e| PluginError::Runtime(e.to_string()))?);
    Uri::from_parts(parts).map_err(|e| PluginError::Runtime(e.to_string()))
}

/// Worker pool profile shared by both managers.
fn proxy_configuration(sticky: Option<StickyRule>) -> ProxyConfiguration {
    let policy = match sticky.as_ref().and_then(StickyRule::header_name) {
        Some(header) => Policy::Header(header.clone()),
        None => Policy::LeastConn,
    };
    ProxyConfiguration {
        policy,
        fail_timeout: Duration::from_millis(500),
        max_fails: 1,
        max_conns: 0,
        keepalive: 100,
        try_duration: Duration::from_secs(1),
        try_interval: Duration::from_millis(50),
        sticky,
    }
}

fn no_proxy(api: Api) -> Handler {
    handler_fn(move |req: Request<Body>| async move {
        tracing::error!(plugin = GroupwarePlugin::ID, api = ?api, path = %req.uri().path(), "Proxy not configured");
        StatusCode::BAD_GATEWAY.into_response()
    })
}

struct Handlers {
    rest: Handler,
    notify: Handler,
    rest_legacy: Handler,
    notify_legacy: Handler,
}

impl Handlers {
    fn get(&self, route: Route) -> &Handler {
        match (route.api, route.legacy) {
            (Api::Rest, false) => &self.rest,
            (Api::Notify, false) => &self.notify,
            (Api::Rest, true) => &self.rest_legacy,
            (Api::Notify, true) => &self.notify_legacy,
        }
    }
}

struct Running {
    enable_v0: bool,
    handlers: Handlers,
    managers: Vec<Arc<ProxyManager>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

pub struct GroupwarePlugin {
    running: OnceLock<Running>,
}

impl GroupwarePlugin {
    pub const ID: &'static str = "groupware-core";

    pub fn new() -> Self {
        Self {
            running: OnceLock::new(),
        }
    }

    /// Managers watching the socket directory, REST first. Empty before initialization.
    pub fn managers(&self) -> &[Arc<ProxyManager>] {
        self.running.get().map(|r| r.managers.as_slice()).unwrap_or_default()
    }

    fn initialization_error(message: impl Into<String>) -> PluginError {
        PluginError::Initialization {
            plugin: Self::ID.to_string(),
            message: message.into(),
        }
    }

    async fn socket_directory(config: &GroupwareConfig) -> Result<PathBuf, PluginError> {
        let Some(sockets) = &config.sockets else {
            return Err(Self::initialization_error("socket path is not configured"));
        };
        let directory = tokio::fs::canonicalize(sockets)
            .await
            .map_err(|e| Self::initialization_error(format!("socket path {}: {e}", sockets.display())))?;
        let metadata = tokio::fs::metadata(&directory)
            .await
            .map_err(|e| Self::initialization_error(format!("socket path {}: {e}", directory.display())))?;
        if !metadata.is_dir() {
            return Err(Self::initialization_error(format!(
                "socket path {} is not a directory",
                directory.display()
            )));
        }
        Ok(directory)
    }

    fn build_handlers(services: &GatewayServices, config: &GroupwareConfig, rest: Arc<ProxySlot>, notify: Arc<ProxySlot>) -> Handlers {
        let chain = |slot: &Arc<ProxySlot>, api: Api, scopes: Vec<String>| {
            let proxied = services.bind_proxy(slot.clone(), no_proxy(api));
            let authed = services.require_token(identity::with_identity(proxied), scopes);
            if config.allow_cors {
                BoxCloneSyncService::new(CorsLayer::permissive().layer(authed))
            } else {
                authed
            }
        };
        let scopes = config.required_scopes.clone();
        Handlers {
            rest: chain(&rest, Api::Rest, scopes.clone()),
            notify: chain(&notify, Api::Notify, scopes),
            rest_legacy: chain(&rest, Api::Rest, Vec::new()),
            notify_legacy: chain(&notify, Api::Notify, Vec::new()),
        }
    }
}

impl Default for GroupwarePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for GroupwarePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::builtin(Self::ID)
    }

    async fn initialize(&self, ctx: PluginContext) -> Result<(), PluginError> {
        let config = ctx.services.config().groupware.clone();
        let directory = Self::socket_directory(&config).await?;

        let sticky = config
            .sticky
            .as_deref()
            .map(StickyRule::from_str)
            .transpose()
            .map_err(|e| Self::initialization_error(e.to_string()))?;

        let rest_slot = Arc::new(ProxySlot::new());
        let notify_slot = Arc::new(ProxySlot::new());
        let managers = vec![
            Arc::new(ProxyManager::new(
                ManagerSettings::new("groupware-rest", &directory, &config.rest_pattern)
                    .with_poll_interval(config.poll_interval())
                    .with_proxy(proxy_configuration(sticky)),
                rest_slot.clone(),
            )),
            Arc::new(ProxyManager::new(
                ManagerSettings::new("groupware-notify", &directory, &config.notify_pattern)
                    .with_poll_interval(config.poll_interval())
                    .with_proxy(proxy_configuration(None)),
                notify_slot.clone(),
            )),
        ];

        let handlers = Self::build_handlers(&ctx.services, &config, rest_slot, notify_slot);
        let cancel = ctx.cancel.child_token();
        let tracker = TaskTracker::new();
        for manager in &managers {
            let manager = manager.clone();
            let cancel = cancel.clone();
            let ctx = ctx.clone();
            let span = tracing::info_span!(parent: ctx.services.span(), "proxy_manager", proxy = %manager.name());
            tracker.spawn(
                async move {
                    if let Err(error) = manager.supervise(cancel).await {
                        ctx.report(PluginError::Background {
                            plugin: Self::ID.to_string(),
                            message: error.to_string(),
                        });
                    }
                }
                .instrument(span),
            );
        }

        let running = Running {
            enable_v0: config.enable_api_v0,
            handlers,
            managers,
            tracker,
            cancel,
        };
        if let Err(running) = self.running.set(running) {
            running.cancel.cancel();
            return Err(Self::initialization_error("already initialized"));
        }

        tracing::debug!(
            plugin = Self::ID,
            directory = %directory.display(),
            api_v0 = config.enable_api_v0,
            cors = config.allow_cors,
            "Plugin initialize"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), PluginError> {
        if let Some(running) = self.running.get() {
            running.cancel.cancel();
            running.tracker.close();
            running.tracker.wait().await;
        }
        tracing::debug!(plugin = Self::ID, "Plugin close");
        Ok(())
    }

    async fn serve_http(&self, req: Request<Body>) -> Result<Dispatch, PluginError> {
        let Some(running) = self.running.get() else {
            return Ok(Dispatch::Declined(req));
        };
        let Some(route) = route(req.uri().path(), running.enable_v0) else {
            return Ok(Dispatch::Declined(req));
        };

        let mut req = req;
        if route.legacy {
            let uri = rewrite_legacy(req.uri())?;
            *req.uri_mut() = uri;
        }
        let handler = running.handlers.get(route);
        Ok(Dispatch::Handled(handler::call(handler, req).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing() {
        assert_eq!(
            route("/api/gc/v1/subscriptions/abc", false),
            Some(Route { api: Api::Notify, legacy: false })
        );
        assert_eq!(route("/api/gc/v1/me", false), Some(Route { api: Api::Rest, legacy: false }));
        assert_eq!(route("/api/gc/v0/me", false), None);
        assert_eq!(route("/api/gc/v0/subscriptions", true), Some(Route { api: Api::Notify, legacy: true }));
        assert_eq!(route("/api/gc/v1", false), None);
        assert_eq!(route("/other", true), None);
    }

    #[test]
    fn test_legacy_rewrite_keeps_query() {
        let uri: Uri = "/api/gc/v0/me/messages?top=5".parse().unwrap();
        let rewritten = rewrite_legacy(&uri).unwrap();
        assert_eq!(rewritten.path(), "/api/gc/v1/me/messages");
        assert_eq!(rewritten.query(), Some("top=5"));
    }

    #[test]
    fn test_sticky_header_selects_header_policy() {
        let rule: StickyRule = "cookie sid set-upstream-header X-Sticky".parse().unwrap();
        let config = proxy_configuration(Some(rule));
        assert!(matches!(config.policy, Policy::Header(ref h) if h == "x-sticky"));
        assert_eq!(proxy_configuration(None).policy, Policy::LeastConn);
        assert_eq!(config.keepalive, 100);
    }

    #[tokio::test]
    async fn test_requires_socket_directory() {
        let mut config = GroupwareConfig::default();
        assert!(matches!(
            GroupwarePlugin::socket_directory(&config).await,
            Err(PluginError::Initialization { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rest1.sock");
        std::fs::write(&file, b"").unwrap();
        config.sockets = Some(file);
        assert!(GroupwarePlugin::socket_directory(&config).await.is_err());

        config.sockets = Some(dir.path().to_path_buf());
        let resolved = GroupwarePlugin::socket_directory(&config).await.unwrap();
        assert!(resolved.is_dir());
    }

    #[tokio::test]
    async fn test_uninitialized_plugin_declines() {
        let plugin = GroupwarePlugin::new();
        let req = Request::builder().uri("/api/gc/v1/me").body(Body::empty()).unwrap();
        assert!(matches!(plugin.serve_http(req).await.unwrap(), Dispatch::Declined(_)));
        assert!(plugin.managers().is_empty());
        plugin.close().await.unwrap();
    }
}
