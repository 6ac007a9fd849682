//! Identity headers for groupware workers.
//!
//! Workers trust these headers, so client-supplied copies are always removed
//! and only values from the request's `AuthRecord` are forwarded.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::IntoResponse;

use crate::auth::AuthRecord;
use crate::http::handler::{self, handler_fn, Handler};

pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-gateway-user-id");
pub const USERNAME_HEADER: HeaderName = HeaderName::from_static("x-gateway-username");

pub fn strip_identity_headers(headers: &mut HeaderMap) {
    headers.remove(USER_ID_HEADER);
    headers.remove(USERNAME_HEADER);
}

/// Copy the authenticated identity into the worker headers.
///
/// Returns false when the request carries no `AuthRecord`.
pub fn inject_identity(req: &mut Request<Body>) -> bool {
    let Some(record) = req.extensions().get::<AuthRecord>() else {
        strip_identity_headers(req.headers_mut());
        return false;
    };

    let user_id = HeaderValue::from_str(record.user_id()).ok();
    let username = record.username().and_then(|u| HeaderValue::from_str(&u).ok());
    if username.is_none() {
        tracing::debug!(subject = %record.subject, "Token carries no username");
    }

    let headers = req.headers_mut();
    strip_identity_headers(headers);
    if let Some(user_id) = user_id {
        headers.insert(USER_ID_HEADER, user_id);
    }
    if let Some(username) = username {
        headers.insert(USERNAME_HEADER, username);
    }
    true
}

/// Wrap `next` so it only sees requests with injected identity headers.
pub fn with_identity(next: Handler) -> Handler {
    handler_fn(move |mut req: Request<Body>| {
        let next = next.clone();
        async move {
            if !inject_identity(&mut req) {
                tracing::error!(path = %req.uri().path(), "No auth record to inject");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            handler::call(&next, req).await
        }
    })
}
