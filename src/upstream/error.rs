use axum::http::StatusCode;

use crate::discovery::UpstreamTarget;

/// Error type for proxied requests and proxy construction.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Every upstream was down or at capacity for the whole try window.
    #[error("no upstream available for proxy {proxy}")]
    Unavailable { proxy: String },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: UpstreamTarget,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {target} failed: {source}")]
    Handshake {
        target: UpstreamTarget,
        #[source]
        source: hyper::Error,
    },

    #[error("upstream {target} failed: {source}")]
    Upstream {
        target: UpstreamTarget,
        #[source]
        source: hyper::Error,
    },

    #[error("invalid proxy configuration: {0}")]
    InvalidConfiguration(String),
}

impl ProxyError {
    /// Status code presented to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}
