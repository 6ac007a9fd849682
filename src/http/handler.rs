//! Composable request handlers.
//!
//! Plugins build their routes out of boxed tower services so that auth,
//! proxy binding and fallbacks can wrap each other without generics leaking
//! into the plugin interface.

use std::convert::Infallible;
use std::future::Future;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::util::BoxCloneSyncService;
use tower::{service_fn, ServiceExt};

/// A cloneable, shareable, type-erased request handler that never fails.
pub type Handler = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// Wrap an async function as a `Handler`.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(move |req: Request<Body>| {
        let fut = f(req);
        async move { Ok::<_, Infallible>(fut.await) }
    }))
}

/// A handler that answers every request with `status` and an empty body.
pub fn status_handler(status: StatusCode) -> Handler {
    handler_fn(move |_req| async move { status.into_response() })
}

/// Drive a handler to completion for one request.
pub async fn call(handler: &Handler, req: Request<Body>) -> Response {
    match handler.clone().oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_handler() {
        let handler = status_handler(StatusCode::BAD_GATEWAY);
        let req = Request::builder().body(Body::empty()).unwrap();
        let response = call(&handler, req).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
