//! Gateway counters.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): responses by status code
//! - `gateway_upstream_failures_total` (counter): failed upstream attempts by proxy
//! - `gateway_proxy_installs_total` (counter): proxies built by a manager

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const UPSTREAM_FAILURES_TOTAL: &str = "gateway_upstream_failures_total";
pub const PROXY_INSTALLS_TOTAL: &str = "gateway_proxy_installs_total";

pub fn record_request(status: StatusCode) {
    metrics::counter!(REQUESTS_TOTAL, "status" => status.as_u16().to_string()).increment(1);
}

pub fn record_upstream_failure(proxy: &str) {
    metrics::counter!(UPSTREAM_FAILURES_TOTAL, "proxy" => proxy.to_string()).increment(1);
}

pub fn record_proxy_install(proxy: &str) {
    metrics::counter!(PROXY_INSTALLS_TOTAL, "proxy" => proxy.to_string()).increment(1);
}

/// Middleware counting every response by status.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    record_request(response.status());
    response
}
