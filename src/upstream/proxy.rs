//! The load-balancing proxy bound to one settled target set.
//!
//! # Responsibilities
//! - Pick an available upstream with the configured policy
//! - Retry pre-send failures against other upstreams within `try_duration`
//! - Stream the upstream response back and recycle the connection at EOF
//! - Record failures and successes on the upstream health state

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::Request;
use axum::response::Response;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::client::conn::http1::SendRequest;

use crate::discovery::TargetSet;
use crate::observability::metrics;
use crate::upstream::config::ProxyConfiguration;
use crate::upstream::error::ProxyError;
use crate::upstream::forward;
use crate::upstream::policy::Selector;
use crate::upstream::target::{Upstream, UpstreamGuard};

/// Reverse proxy over a fixed set of upstream sockets.
#[derive(Debug)]
pub struct UpstreamProxy {
    name: String,
    upstreams: Vec<Arc<Upstream>>,
    selector: Box<dyn Selector>,
    config: ProxyConfiguration,
}

impl UpstreamProxy {
    /// Build a proxy over `targets`. An empty set is a configuration error.
    pub fn new(
        name: impl Into<String>,
        targets: &TargetSet,
        config: ProxyConfiguration,
    ) -> Result<Self, ProxyError> {
        let name = name.into();
        if targets.is_empty() {
            return Err(ProxyError::InvalidConfiguration(format!(
                "proxy {name} has no upstream targets"
            )));
        }
        config.validate()?;

        let upstreams = targets
            .iter()
            .map(|t| Arc::new(Upstream::new(t.clone(), config.max_conns, config.keepalive)))
            .collect();

        Ok(Self {
            name,
            upstreams,
            selector: config.policy.selector(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    pub fn config(&self) -> &ProxyConfiguration {
        &self.config
    }

    /// Select an available upstream and reserve a slot on it.
    ///
    /// Losing a race for the last slot removes that upstream from the
    /// candidates and selects again.
    fn acquire(&self, req: &Request<Body>) -> Option<UpstreamGuard> {
        let mut candidates: Vec<Arc<Upstream>> = self
            .upstreams
            .iter()
            .filter(|u| u.is_available(self.config.max_fails))
            .cloned()
            .collect();

        while !candidates.is_empty() {
            let chosen = self.selector.select(&candidates, req)?;
            if let Some(guard) = chosen.try_acquire() {
                return Some(guard);
            }
            candidates.retain(|u| !Arc::ptr_eq(u, &chosen));
        }
        None
    }

    fn record_failure(&self, upstream: &Upstream, error: &ProxyError) {
        let failures = upstream.mark_failure(self.config.fail_timeout);
        metrics::record_upstream_failure(&self.name);
        tracing::warn!(
            proxy = %self.name,
            upstream = %upstream.target(),
            failures,
            error = %error,
            "Upstream attempt failed"
        );
    }

    /// Forward one request.
    ///
    /// The body is never buffered, so once it has been handed to a connection
    /// the request is not retried.
    pub async fn serve(&self, mut req: Request<Body>) -> Result<Response, ProxyError> {
        let sticky = self.config.sticky.as_ref().map(|rule| rule.apply(&mut req));
        forward::prepare_request(&mut req);

        let started = Instant::now();
        let mut attempts = 0u32;

        let (response, checkin) = loop {
            attempts += 1;

            if let Some(guard) = self.acquire(&req) {
                match guard.checkout().await {
                    Ok(mut sender) => match sender.try_send_request(req).await {
                        Ok(response) => {
                            guard.mark_success();
                            break (response, Checkin { guard, sender });
                        }
                        Err(mut err) => match err.take_message() {
                            Some(unsent) => {
                                req = unsent;
                                let error = ProxyError::Upstream {
                                    target: guard.target().clone(),
                                    source: err.into_error(),
                                };
                                self.record_failure(&guard, &error);
                            }
                            None => {
                                let error = ProxyError::Upstream {
                                    target: guard.target().clone(),
                                    source: err.into_error(),
                                };
                                self.record_failure(&guard, &error);
                                return Err(error);
                            }
                        },
                    },
                    Err(error) => self.record_failure(&guard, &error),
                }
            }

            if started.elapsed() >= self.config.try_duration {
                tracing::warn!(
                    proxy = %self.name,
                    attempts,
                    "No upstream available"
                );
                return Err(ProxyError::Unavailable {
                    proxy: self.name.clone(),
                });
            }
            tokio::time::sleep(self.config.try_interval).await;
        };

        let (mut parts, body) = response.into_parts();
        forward::strip_hop_by_hop(&mut parts.headers);
        if let Some(sticky) = sticky {
            sticky.finish(&mut parts.headers);
        }

        Ok(Response::from_parts(parts, Body::new(TrackedBody::new(body, checkin))))
    }
}

/// Connection slot and sender held until the response body completes.
struct Checkin {
    guard: UpstreamGuard,
    sender: SendRequest<Body>,
}

impl Checkin {
    fn release(self) {
        let Checkin { guard, sender } = self;
        guard.idle().push(sender);
    }
}

/// Response body that returns its connection to the pool at end of stream.
///
/// Dropping it early, or a body error, closes the connection instead.
struct TrackedBody {
    inner: Incoming,
    checkin: Option<Checkin>,
}

impl TrackedBody {
    fn new(inner: Incoming, checkin: Checkin) -> Self {
        let mut body = Self {
            inner,
            checkin: Some(checkin),
        };
        if body.inner.is_end_stream() {
            body.release();
        }
        body
    }

    fn release(&mut self) {
        if let Some(checkin) = self.checkin.take() {
            checkin.release();
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            None => this.release(),
            Some(Ok(_)) if this.inner.is_end_stream() => this.release(),
            Some(Ok(_)) => {}
            Some(Err(_)) => this.checkin = None,
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;

    use super::*;
    use crate::upstream::policy::Policy;

    fn request() -> Request<Body> {
        Request::builder()
            .uri("/api/gc/v1/me")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_empty_target_set_rejected() {
        let err = UpstreamProxy::new("rest", &TargetSet::default(), ProxyConfiguration::default())
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidConfiguration(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_acquire_skips_full_upstreams() {
        let targets = TargetSet::from_paths(["/run/rest1.sock", "/run/rest2.sock"]);
        let config = ProxyConfiguration {
            policy: Policy::First,
            max_conns: 1,
            ..Default::default()
        };
        let proxy = UpstreamProxy::new("rest", &targets, config).unwrap();

        let g1 = proxy.acquire(&request()).unwrap();
        let g2 = proxy.acquire(&request()).unwrap();
        assert_ne!(g1.target(), g2.target());
        assert!(proxy.acquire(&request()).is_none());

        drop(g1);
        assert!(proxy.acquire(&request()).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_upstreams_are_marked_down() {
        let dir = tempfile::tempdir().unwrap();
        let targets = TargetSet::from_paths([dir.path().join("rest1.sock"), dir.path().join("rest2.sock")]);
        let config = ProxyConfiguration {
            fail_timeout: Duration::from_secs(10),
            max_fails: 1,
            try_duration: Duration::from_millis(200),
            try_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let proxy = UpstreamProxy::new("rest", &targets, config).unwrap();

        let started = Instant::now();
        let err = proxy.serve(request()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Unavailable { .. }));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(started.elapsed() < Duration::from_secs(2));

        for upstream in proxy.upstreams() {
            assert!(upstream.is_down(1));
            assert_eq!(upstream.active_connections(), 0);
        }
    }

    #[tokio::test]
    async fn test_zero_try_duration_is_a_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let targets = TargetSet::from_paths([dir.path().join("rest1.sock")]);
        let proxy = UpstreamProxy::new("rest", &targets, ProxyConfiguration::default()).unwrap();

        let started = Instant::now();
        assert!(proxy.serve(request()).await.is_err());
        assert!(started.elapsed() < ProxyConfiguration::default().try_interval);
    }
}
