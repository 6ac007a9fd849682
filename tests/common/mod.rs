//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use url::Url;

use socket_gateway::auth::{ExtraClaims, IdentityProvider, ProviderError, StandardClaims, ValidatedToken};

/// A worker listening on a unix socket.
///
/// Every response is a JSON echo of what the worker received.
pub struct UnixBackend {
    pub name: String,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl UnixBackend {
    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for UnixBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(req: &Request<Incoming>, name: &str) -> Value {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}

fn echo(name: &str, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let body = json!({
        "worker": name,
        "path": req.uri().path_and_query().map(|pq| pq.as_str()),
        "host": header(req, "host"),
        "forwarded_for": header(req, "x-forwarded-for"),
        "forwarded_host": header(req, "x-forwarded-host"),
        "real_ip": header(req, "x-real-ip"),
        "user_id": header(req, "x-gateway-user-id"),
        "username": header(req, "x-gateway-username"),
        "authorization": header(req, "authorization"),
    });
    Response::builder()
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Start an echo worker at `path`.
pub fn start_unix_backend(path: &Path, name: &str) -> UnixBackend {
    let listener = UnixListener::bind(path).unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));
    let name = name.to_string();

    let task = tokio::spawn({
        let connections = connections.clone();
        let requests = requests.clone();
        let name = name.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                connections.fetch_add(1, Ordering::SeqCst);
                let requests = requests.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        requests.fetch_add(1, Ordering::SeqCst);
                        let response = echo(&name, &req);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        }
    });

    UnixBackend {
        name,
        connections,
        requests,
        task,
    }
}

/// Identity provider with a fixed token table.
#[derive(Default)]
pub struct MockProvider {
    tokens: HashMap<String, ValidatedToken>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as an access token for `subject` carrying `scopes`.
    pub fn with_token(mut self, token: &str, subject: &str, scopes: &[&str]) -> Self {
        let extra: ExtraClaims = serde_json::from_value(json!({
            "kc.isAccessToken": true,
            "kc.authorizedScopes": scopes,
            "kc.identity": { "kc.i.id": format!("{subject}-id"), "kc.i.un": subject },
        }))
        .unwrap();
        self.tokens.insert(
            token.to_string(),
            ValidatedToken {
                subject: subject.to_string(),
                standard: StandardClaims {
                    sub: subject.to_string(),
                    ..Default::default()
                },
                extra,
            },
        );
        self
    }

    pub fn into_arc(self) -> Arc<dyn IdentityProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn initialize(&self, _issuer: Url) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Result<ValidatedToken, ProviderError> {
        self.tokens.get(token).cloned().ok_or(ProviderError::Inactive)
    }
}

/// HTTP client that never reuses or proxies connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
