//! Upstream selection policies.
//!
//! Selectors only choose among candidates the proxy already filtered for
//! health and capacity; they never see an unavailable upstream.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, Request};
use rand::Rng;

use crate::upstream::error::ProxyError;
use crate::upstream::target::Upstream;

/// Strategy for picking one upstream from the available candidates.
pub trait Selector: Send + Sync + fmt::Debug {
    fn select(&self, candidates: &[Arc<Upstream>], req: &Request<Body>) -> Option<Arc<Upstream>>;
}

/// Named load-balancing policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Policy {
    #[default]
    Random,
    LeastConn,
    RoundRobin,
    First,
    UriHash,
    /// Hash of the named request header; random when the header is absent.
    Header(HeaderName),
}

impl Policy {
    /// Build a fresh selector for one proxy instance.
    pub fn selector(&self) -> Box<dyn Selector> {
        match self {
            Policy::Random => Box::new(RandomSelector),
            Policy::LeastConn => Box::new(LeastConn),
            Policy::RoundRobin => Box::new(RoundRobin::default()),
            Policy::First => Box::new(First),
            Policy::UriHash => Box::new(UriHash),
            Policy::Header(name) => Box::new(HeaderHash { name: name.clone() }),
        }
    }
}

impl FromStr for Policy {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let policy = match parts.next() {
            Some("random") => Policy::Random,
            Some("least_conn") => Policy::LeastConn,
            Some("round_robin") => Policy::RoundRobin,
            Some("first") => Policy::First,
            Some("uri_hash") => Policy::UriHash,
            Some("header") => {
                let name = parts.next().ok_or_else(|| {
                    ProxyError::InvalidConfiguration("header policy requires a header name".into())
                })?;
                let name = HeaderName::from_str(name).map_err(|e| {
                    ProxyError::InvalidConfiguration(format!("invalid policy header {name}: {e}"))
                })?;
                Policy::Header(name)
            }
            other => {
                return Err(ProxyError::InvalidConfiguration(format!(
                    "unknown policy: {}",
                    other.unwrap_or("")
                )))
            }
        };
        if parts.next().is_some() {
            return Err(ProxyError::InvalidConfiguration(format!(
                "unexpected arguments in policy: {s}"
            )));
        }
        Ok(policy)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Random => f.write_str("random"),
            Policy::LeastConn => f.write_str("least_conn"),
            Policy::RoundRobin => f.write_str("round_robin"),
            Policy::First => f.write_str("first"),
            Policy::UriHash => f.write_str("uri_hash"),
            Policy::Header(name) => write!(f, "header {name}"),
        }
    }
}

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn select(&self, candidates: &[Arc<Upstream>], _req: &Request<Body>) -> Option<Arc<Upstream>> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }
}

/// Fewest in-flight requests wins. Ties are broken randomly so that idle
/// workers share load instead of the first one taking everything.
#[derive(Debug, Default)]
pub struct LeastConn;

impl Selector for LeastConn {
    fn select(&self, candidates: &[Arc<Upstream>], _req: &Request<Body>) -> Option<Arc<Upstream>> {
        let mut rng = rand::thread_rng();
        let mut best: Option<&Arc<Upstream>> = None;
        let mut best_conns = usize::MAX;
        let mut ties = 0u32;

        for upstream in candidates {
            let conns = upstream.active_connections();
            if conns < best_conns {
                best = Some(upstream);
                best_conns = conns;
                ties = 1;
            } else if conns == best_conns {
                ties += 1;
                if rng.gen_range(0..ties) == 0 {
                    best = Some(upstream);
                }
            }
        }
        best.cloned()
    }
}

/// Rotates through candidates using an internal counter.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl Selector for RoundRobin {
    fn select(&self, candidates: &[Arc<Upstream>], _req: &Request<Body>) -> Option<Arc<Upstream>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }
}

/// Always the first available candidate, in discovery order.
#[derive(Debug, Default)]
pub struct First;

impl Selector for First {
    fn select(&self, candidates: &[Arc<Upstream>], _req: &Request<Body>) -> Option<Arc<Upstream>> {
        candidates.first().cloned()
    }
}

/// Same path and query always map to the same candidate.
#[derive(Debug, Default)]
pub struct UriHash;

impl Selector for UriHash {
    fn select(&self, candidates: &[Arc<Upstream>], req: &Request<Body>) -> Option<Arc<Upstream>> {
        let key = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        pick_by_hash(candidates, key)
    }
}

#[derive(Debug)]
pub struct HeaderHash {
    name: HeaderName,
}

impl Selector for HeaderHash {
    fn select(&self, candidates: &[Arc<Upstream>], req: &Request<Body>) -> Option<Arc<Upstream>> {
        match req
            .headers()
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            Some(value) => pick_by_hash(candidates, value),
            None => RandomSelector.select(candidates, req),
        }
    }
}

fn pick_by_hash(candidates: &[Arc<Upstream>], key: &str) -> Option<Arc<Upstream>> {
    if candidates.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let index = (hasher.finish() % candidates.len() as u64) as usize;
    Some(candidates[index].clone())
}
