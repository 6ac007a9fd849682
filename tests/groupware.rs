//! The groupware plugin proxying to unix socket workers.

mod common;

use std::path::Path;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use socket_gateway::config::GatewayConfig;
use socket_gateway::http::ServerError;
use socket_gateway::lifecycle::{Gateway, Shutdown};
use socket_gateway::plugins::{PluginError, PluginRegistry};

use common::{client, start_unix_backend, url, MockProvider, UnixBackend};

struct Workers {
    _rest: UnixBackend,
    _notify: UnixBackend,
}

fn workers(dir: &Path) -> Workers {
    Workers {
        _rest: start_unix_backend(&dir.join("rest1.sock"), "rest"),
        _notify: start_unix_backend(&dir.join("notify1.sock"), "notify"),
    }
}

fn config(sockets: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.plugins.enabled = "groupware-core".to_string();
    config.groupware.sockets = Some(sockets.to_path_buf());
    config.groupware.poll_interval_ms = 20;
    config
}

async fn serve(config: GatewayConfig) -> (std::net::SocketAddr, Shutdown, tokio::task::JoinHandle<()>) {
    let provider = MockProvider::new()
        .with_token("full", "alice", &["profile", "email", "groupware"])
        .with_token("partial", "bob", &["profile"])
        .into_arc();
    let gateway = Gateway::start(config, &PluginRegistry::builtin(), provider, CancellationToken::new())
        .await
        .unwrap();
    let addr = gateway.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { gateway.serve(&shutdown).await.unwrap() }
    });
    (addr, shutdown, task)
}

/// Retry until the managers have installed their proxies.
async fn get_when_ready(url: &str, token: &str) -> reqwest::Response {
    let client = client();
    for _ in 0..100 {
        let res = client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header("x-gateway-user-id", "spoofed")
            .send()
            .await
            .unwrap();
        if res.status() != StatusCode::BAD_GATEWAY {
            return res;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("proxy never became ready for {url}");
}

#[tokio::test]
async fn test_v1_requests_reach_workers_with_identity() {
    let dir = tempfile::tempdir().unwrap();
    let _workers = workers(dir.path());
    let (addr, shutdown, task) = serve(config(dir.path())).await;

    let res = get_when_ready(&url(addr, "/api/gc/v1/me?top=1"), "full").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["worker"], "rest");
    assert_eq!(body["path"], "/api/gc/v1/me?top=1");
    assert_eq!(body["user_id"], "alice-id");
    assert_eq!(body["username"], "alice");
    assert_eq!(body["real_ip"], "127.0.0.1");

    let res = get_when_ready(&url(addr, "/api/gc/v1/subscriptions/abc"), "full").await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["worker"], "notify");
    assert_eq!(body["user_id"], "alice-id");

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_scopes_are_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let _workers = workers(dir.path());
    let (addr, shutdown, task) = serve(config(dir.path())).await;
    let client = client();

    let res = client.get(url(addr, "/api/gc/v1/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(url(addr, "/api/gc/v1/me"))
        .header(AUTHORIZATION, "Bearer partial")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(res.bytes().await.unwrap().is_empty());

    let res = client
        .get(url(addr, "/api/gc/v1/me"))
        .header(AUTHORIZATION, "Bearer unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Legacy paths are off by default.
    let res = client
        .get(url(addr, "/api/gc/v0/me"))
        .header(AUTHORIZATION, "Bearer full")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_legacy_paths_are_rewritten_without_scopes() {
    let dir = tempfile::tempdir().unwrap();
    let _workers = workers(dir.path());
    let mut config = config(dir.path());
    config.groupware.enable_api_v0 = true;
    let (addr, shutdown, task) = serve(config).await;

    let res = get_when_ready(&url(addr, "/api/gc/v0/me/messages?top=5"), "partial").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["worker"], "rest");
    assert_eq!(body["path"], "/api/gc/v1/me/messages?top=5");
    assert_eq!(body["username"], "bob");

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_no_workers_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, shutdown, task) = serve(config(dir.path())).await;

    let res = client()
        .get(url(addr, "/api/gc/v1/me"))
        .header(AUTHORIZATION, "Bearer full")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_cors_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.groupware.allow_cors = true;
    let (addr, shutdown, task) = serve(config).await;

    let res = client()
        .request(reqwest::Method::OPTIONS, url(addr, "/api/gc/v1/me"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_missing_socket_path_aborts_startup() {
    let mut config = config(Path::new("/unused"));
    config.groupware.sockets = None;
    let provider = MockProvider::new().into_arc();

    let result = Gateway::start(config, &PluginRegistry::builtin(), provider, CancellationToken::new()).await;
    match result {
        Err(ServerError::Plugin(PluginError::Initialization { plugin, message })) => {
            assert_eq!(plugin, "groupware-core");
            assert!(message.contains("socket path"), "{message}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("gateway started without a socket path"),
    }
}
