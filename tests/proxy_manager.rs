//! ProxyManager discovering workers in a socket directory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use tokio_util::sync::CancellationToken;

use socket_gateway::manager::{ManagerSettings, ManagerState, ProxyManager, ProxySlot};

use common::start_unix_backend;

fn manager(dir: &std::path::Path, poll: Duration) -> Arc<ProxyManager> {
    let settings = ManagerSettings::new("rest", dir, "rest*.sock").with_poll_interval(poll);
    Arc::new(ProxyManager::new(settings, Arc::new(ProxySlot::new())))
}

#[tokio::test]
async fn test_builds_once_after_two_equal_observations() {
    let dir = tempfile::tempdir().unwrap();
    let _w1 = start_unix_backend(&dir.path().join("rest1.sock"), "w1");
    let manager = manager(dir.path(), Duration::from_millis(200));

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run(CancellationToken::new()).await }
    });

    // First poll happens immediately, the second one 200ms later.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*manager.state().borrow(), ManagerState::Settling);
    assert!(manager.slot().current().is_none());
    assert_eq!(manager.builds(), 0);

    let proxy = task.await.unwrap().unwrap().unwrap();
    assert_eq!(*manager.state().borrow(), ManagerState::Active);
    assert_eq!(manager.builds(), 1);
    assert_eq!(proxy.upstreams().len(), 1);
    let installed = manager.slot().current().unwrap();
    assert!(Arc::ptr_eq(&installed, &proxy));
}

#[tokio::test]
async fn test_changing_set_restarts_settling() {
    let dir = tempfile::tempdir().unwrap();
    let _w1 = start_unix_backend(&dir.path().join("rest1.sock"), "w1");
    let manager = manager(dir.path(), Duration::from_millis(200));

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run(CancellationToken::new()).await }
    });

    // Appears between the first and second poll.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _w2 = start_unix_backend(&dir.path().join("rest2.sock"), "w2");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.builds(), 0);

    let proxy = task.await.unwrap().unwrap().unwrap();
    assert_eq!(proxy.upstreams().len(), 2);
    assert_eq!(manager.builds(), 1);
}

#[tokio::test]
async fn test_waits_for_sockets_then_serves() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(manager.clone().supervise(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*manager.state().borrow(), ManagerState::Searching);
    assert!(manager.slot().current().is_none());

    let _w1 = start_unix_backend(&dir.path().join("rest1.sock"), "w1");
    let slot = manager.slot().clone();
    assert!(common::wait_for(Duration::from_secs(2), || slot.current().is_some()).await);

    let proxy = slot.current().unwrap();
    let response = proxy
        .serve(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_success());
    drop(response);
    drop(proxy);

    // Active managers stop polling; cancellation releases the proxy.
    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(slot.current().is_none());
    assert_eq!(*manager.state().borrow(), ManagerState::Closed);
    assert_eq!(manager.builds(), 1);
}

#[tokio::test]
async fn test_ignores_sockets_not_matching_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let _other = start_unix_backend(&dir.path().join("notify1.sock"), "n1");
    let manager = manager(dir.path(), Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let manager = manager.clone();
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.builds(), 0);
    cancel.cancel();
    assert!(task.await.unwrap().unwrap().is_none());
}
