//! UpstreamProxy against real unix socket workers.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;

use socket_gateway::discovery::TargetSet;
use socket_gateway::upstream::{Policy, ProxyConfiguration, ProxyError, UpstreamProxy};

use common::start_unix_backend;

fn request(path: &str) -> Request<Body> {
    let mut req = Request::builder()
        .uri(path)
        .header("host", "gw.example.com")
        .header("connection", "close")
        .header("x-forwarded-for", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 50000))));
    req
}

async fn json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn failover_config() -> ProxyConfiguration {
    ProxyConfiguration {
        policy: Policy::First,
        fail_timeout: Duration::from_millis(300),
        max_fails: 1,
        try_duration: Duration::from_secs(1),
        try_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failed_upstream_is_excluded_until_fail_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let dead = dir.path().join("rest0.sock");
    let live = dir.path().join("rest1.sock");
    let _backend = start_unix_backend(&live, "w1");

    let proxy = UpstreamProxy::new("rest", &TargetSet::from_paths([&dead, &live]), failover_config()).unwrap();

    // The dead worker is tried first, marked down, and the request lands on w1.
    let body = json(proxy.serve(request("/api/one")).await.unwrap()).await;
    assert_eq!(body["worker"], "w1");
    assert_eq!(proxy.upstreams()[0].failures(), 1);
    assert!(proxy.upstreams()[0].is_down(1));

    // While down it is skipped without another attempt.
    let body = json(proxy.serve(request("/api/two")).await.unwrap()).await;
    assert_eq!(body["worker"], "w1");
    assert_eq!(proxy.upstreams()[0].failures(), 1);

    // After fail_timeout it is eligible again.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(!proxy.upstreams()[0].is_down(1));
    let body = json(proxy.serve(request("/api/three")).await.unwrap()).await;
    assert_eq!(body["worker"], "w1");
    assert_eq!(proxy.upstreams()[0].failures(), 1);
}

#[tokio::test]
async fn test_all_upstreams_down_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let targets = TargetSet::from_paths([dir.path().join("rest0.sock"), dir.path().join("rest1.sock")]);
    let config = ProxyConfiguration {
        try_duration: Duration::from_millis(100),
        ..failover_config()
    };
    let proxy = UpstreamProxy::new("rest", &targets, config).unwrap();

    let err = proxy.serve(request("/api/x")).await.unwrap_err();
    assert!(matches!(err, ProxyError::Unavailable { .. }));
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    assert!(proxy.upstreams().iter().all(|u| u.is_down(1)));
}

#[tokio::test]
async fn test_connections_are_kept_alive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rest1.sock");
    let backend = start_unix_backend(&path, "w1");
    let config = ProxyConfiguration {
        keepalive: 4,
        ..Default::default()
    };
    let proxy = UpstreamProxy::new("rest", &TargetSet::from_paths([&path]), config).unwrap();

    for i in 0..3 {
        let body = json(proxy.serve(request(&format!("/api/{i}"))).await.unwrap()).await;
        assert_eq!(body["path"], format!("/api/{i}"));
    }
    assert_eq!(backend.requests(), 3);
    assert_eq!(backend.connections(), 1);
    assert_eq!(proxy.upstreams()[0].active_connections(), 0);
}

#[tokio::test]
async fn test_forwarding_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rest1.sock");
    let _backend = start_unix_backend(&path, "w1");
    let proxy = UpstreamProxy::new("rest", &TargetSet::from_paths([&path]), ProxyConfiguration::default()).unwrap();

    let body = json(proxy.serve(request("/api/me?x=1")).await.unwrap()).await;
    assert_eq!(body["path"], "/api/me?x=1");
    assert_eq!(body["host"], "gw.example.com");
    assert_eq!(body["forwarded_host"], "gw.example.com");
    assert_eq!(body["forwarded_for"], "192.0.2.1, 10.0.0.7");
    assert_eq!(body["real_ip"], "10.0.0.7");
}

#[tokio::test]
async fn test_least_conn_spreads_concurrent_requests() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("rest1.sock");
    let b = dir.path().join("rest2.sock");
    let backend_a = start_unix_backend(&a, "a");
    let backend_b = start_unix_backend(&b, "b");
    let config = ProxyConfiguration {
        policy: Policy::LeastConn,
        ..Default::default()
    };
    let proxy = UpstreamProxy::new("rest", &TargetSet::from_paths([&a, &b]), config).unwrap();

    // Hold both responses open so each selection sees the other in flight.
    let first = proxy.serve(request("/1")).await.unwrap();
    let second = proxy.serve(request("/2")).await.unwrap();
    assert_eq!(proxy.upstreams()[0].active_connections(), 1);
    assert_eq!(proxy.upstreams()[1].active_connections(), 1);

    json(first).await;
    json(second).await;
    assert_eq!(backend_a.requests() + backend_b.requests(), 2);
    assert_eq!(backend_a.requests(), 1);
}
