//! Request and response header handling for transparent proxying.
//!
//! # Responsibilities
//! - Remove hop-by-hop headers in both directions
//! - Add `X-Forwarded-For`, `X-Forwarded-Host`, `X-Forwarded-Proto`, `X-Real-IP`
//! - Keep the client's `Host` (transparent mode)
//! - Rewrite the request target to origin-form for the socket connection

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{CONNECTION, HOST, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Uri, Version};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// The listener only speaks plain HTTP.
const ACCEPTED_SCHEME: &str = "http";

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const PROXY_AUTHENTICATE: HeaderName = HeaderName::from_static("proxy-authenticate");
const PROXY_AUTHORIZATION: HeaderName = HeaderName::from_static("proxy-authorization");

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        KEEP_ALIVE,
        PROXY_CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// Turn an inbound request into one suitable for an upstream socket.
pub fn prepare_request(req: &mut Request<Body>) {
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let host = req
        .headers()
        .get(HOST)
        .cloned()
        .or_else(|| {
            req.uri()
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

    let headers = req.headers_mut();
    strip_hop_by_hop(headers);

    if let Some(ip) = client_ip {
        let ip = ip.to_string();
        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
            _ => ip.clone(),
        };
        if let Ok(v) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, v);
        }
        if let Ok(v) = HeaderValue::from_str(&ip) {
            headers.insert(X_REAL_IP, v);
        }
    }
    // Client-supplied values are replaced, never trusted.
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(ACCEPTED_SCHEME));
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host.clone());
        headers.insert(HOST, host);
    }

    let path_and_query = req
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *req.uri_mut() = Uri::from(path_and_query);
    *req.version_mut() = Version::HTTP_11;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-kept", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("x-secret").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-kept").is_some());
    }

    #[test]
    fn test_prepare_request() {
        let mut req = Request::builder()
            .uri("http://gateway.local/api/gc/v1/me?x=1")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.168.1.5:4000".parse::<SocketAddr>().unwrap()));

        prepare_request(&mut req);

        assert_eq!(req.uri(), "/api/gc/v1/me?x=1");
        assert_eq!(req.headers().get(HOST).unwrap(), "gateway.local");
        assert_eq!(req.headers().get(&X_FORWARDED_HOST).unwrap(), "gateway.local");
        assert_eq!(
            req.headers().get(&X_FORWARDED_FOR).unwrap(),
            "10.0.0.1, 192.168.1.5"
        );
        assert_eq!(req.headers().get(&X_REAL_IP).unwrap(), "192.168.1.5");
        assert_eq!(req.headers().get(&X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(req.version(), Version::HTTP_11);
    }

    #[test]
    fn test_client_forwarded_proto_is_replaced() {
        let mut req = Request::builder()
            .uri("/api/gc/v1/me")
            .header(HOST, "gateway.local")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        prepare_request(&mut req);

        let values: Vec<_> = req.headers().get_all(&X_FORWARDED_PROTO).iter().collect();
        assert_eq!(values, vec!["http"]);
    }
}
