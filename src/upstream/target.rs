//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single backend worker socket
//! - Track active connections (for Least Connections LB and `max_conns`)
//! - Track failures inside the `fail_timeout` window
//! - Own the idle keep-alive connections to the worker

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper::client::conn::http1::SendRequest;

use crate::discovery::UpstreamTarget;
use crate::upstream::error::ProxyError;
use crate::upstream::pool::{self, IdleConnections};

/// A single backend worker.
#[derive(Debug)]
pub struct Upstream {
    target: UpstreamTarget,
    /// Maximum concurrent requests, 0 means unlimited.
    max_conns: usize,
    active_connections: AtomicUsize,

    /// Failures recorded in the current window.
    failures: AtomicU32,
    /// End of the current failure window, in microseconds since `epoch`.
    window_end: AtomicU64,
    epoch: Instant,

    idle: IdleConnections,
}

impl Upstream {
    pub fn new(target: UpstreamTarget, max_conns: usize, keepalive: usize) -> Self {
        Self {
            target,
            max_conns,
            active_connections: AtomicUsize::new(0),
            failures: AtomicU32::new(0),
            window_end: AtomicU64::new(0),
            epoch: Instant::now(),
            idle: IdleConnections::new(keepalive),
        }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Get the current number of in-flight requests.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> &IdleConnections {
        &self.idle
    }

    fn at_capacity(&self) -> bool {
        self.max_conns != 0 && self.active_connections() >= self.max_conns
    }

    /// Try to reserve a connection slot. Returns `None` when at `max_conns`.
    pub fn try_acquire(self: &Arc<Self>) -> Option<UpstreamGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if self.max_conns != 0 && prev >= self.max_conns {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(UpstreamGuard {
            upstream: self.clone(),
        })
    }

    // --- Health Logic ---

    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// True while `max_fails` failures are recorded and their window is open.
    pub fn is_down(&self, max_fails: u32) -> bool {
        if max_fails == 0 {
            return false;
        }
        self.failures() >= max_fails && self.now_micros() < self.window_end.load(Ordering::Acquire)
    }

    /// Selectable: not down and below the connection cap.
    pub fn is_available(&self, max_fails: u32) -> bool {
        !self.is_down(max_fails) && !self.at_capacity()
    }

    /// Record a failed attempt and restart the failure window.
    ///
    /// A zero `fail_timeout` disables failure accounting entirely.
    pub fn mark_failure(&self, fail_timeout: Duration) -> u32 {
        if fail_timeout.is_zero() {
            return 0;
        }
        let now = self.now_micros();
        let window = fail_timeout.as_micros() as u64;
        let previous_end = self.window_end.swap(now + window, Ordering::AcqRel);
        if now >= previous_end {
            // Previous window expired, start counting afresh.
            self.failures.store(1, Ordering::Release);
            1
        } else {
            self.failures.fetch_add(1, Ordering::AcqRel) + 1
        }
    }

    /// Report a successful exchange.
    pub fn mark_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Get a ready HTTP/1.1 sender, reusing an idle connection when possible.
    pub async fn checkout(&self) -> Result<SendRequest<Body>, ProxyError> {
        while let Some(mut sender) = self.idle.pop() {
            if sender.ready().await.is_ok() {
                return Ok(sender);
            }
        }
        pool::connect(&self.target).await
    }
}

/// A RAII guard that holds one of the upstream's connection slots.
#[derive(Debug)]
pub struct UpstreamGuard {
    upstream: Arc<Upstream>,
}

impl UpstreamGuard {
    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }
}

impl Deref for UpstreamGuard {
    type Target = Upstream;
    fn deref(&self) -> &Self::Target {
        &self.upstream
    }
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        self.upstream
            .active_connections
            .fetch_sub(1, Ordering::AcqRel);
    }
}
