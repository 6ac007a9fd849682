//! Keep-alive connection handling for unix socket upstreams.
//!
//! Each upstream owns a bounded lock-free queue of idle HTTP/1.1 senders.
//! The bound is the `keepalive` setting; connections returned to a full queue
//! are dropped, which closes them.

use std::fmt;

use axum::body::Body;
use crossbeam_queue::ArrayQueue;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crate::discovery::UpstreamTarget;
use crate::upstream::error::ProxyError;

/// Bounded pool of idle connections to one upstream.
pub struct IdleConnections {
    queue: Option<ArrayQueue<SendRequest<Body>>>,
}

impl IdleConnections {
    /// A capacity of zero disables keep-alive.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    /// Pop a sender whose connection is not known to be closed.
    ///
    /// The caller still has to await `ready()` before sending.
    pub fn pop(&self) -> Option<SendRequest<Body>> {
        let queue = self.queue.as_ref()?;
        while let Some(sender) = queue.pop() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    /// Return a sender for reuse. Closed senders and overflow are dropped.
    pub fn push(&self, sender: SendRequest<Body>) {
        if sender.is_closed() {
            return;
        }
        if let Some(queue) = &self.queue {
            let _ = queue.push(sender);
        }
    }

    /// Number of idle connections currently held.
    pub fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, ArrayQueue::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.as_ref().map_or(0, ArrayQueue::capacity)
    }
}

impl fmt::Debug for IdleConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleConnections")
            .field("idle", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Dial the upstream socket and perform the HTTP/1.1 handshake.
///
/// The connection driver runs on its own task until the sender is dropped
/// or the peer closes.
pub async fn connect(target: &UpstreamTarget) -> Result<SendRequest<Body>, ProxyError> {
    let stream = UnixStream::connect(target.path())
        .await
        .map_err(|source| ProxyError::Connect {
            target: target.clone(),
            source,
        })?;

    let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|source| ProxyError::Handshake {
            target: target.clone(),
            source,
        })?;

    let path = target.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(upstream = %path, error = %e, "Upstream connection closed with error");
        }
    });

    sender.ready().await.map_err(|source| ProxyError::Handshake {
        target: target.clone(),
        source,
    })?;

    Ok(sender)
}
