//! Identity provider abstraction.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::auth::record::{ExtraClaims, StandardClaims};

/// Claims of a token the provider accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedToken {
    pub subject: String,
    pub standard: StandardClaims,
    pub extra: ExtraClaims,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider is not initialized")]
    NotInitialized,

    #[error("identity provider not ready after {0:?}")]
    NotReady(Duration),

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token is not active")]
    Inactive,

    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Validates bearer tokens on behalf of the gateway.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Start provider discovery for `issuer`. Discovery continues in the
    /// background; use `wait_until_ready` to block on it.
    async fn initialize(&self, issuer: Url) -> Result<(), ProviderError>;

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ProviderError>;

    async fn validate_token(&self, token: &str) -> Result<ValidatedToken, ProviderError>;
}
