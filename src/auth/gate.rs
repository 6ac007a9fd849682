//! Bearer token enforcement.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;

use crate::auth::provider::{IdentityProvider, ProviderError};
use crate::auth::record::AuthRecord;
use crate::http::handler::{self, handler_fn, Handler};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("bearer authorization required")]
    MissingBearer,

    #[error("invalid token: {0}")]
    InvalidToken(#[source] ProviderError),

    #[error("token is not an access token")]
    NotAccessToken,

    #[error("missing required scope {0}")]
    InsufficientScope(String),
}

impl AuthError {
    /// Every auth failure is a bare 403, claim details are never returned.
    pub fn status(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }
}

/// Validates bearer tokens and attaches the resulting `AuthRecord`.
#[derive(Clone)]
pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Validate the request's bearer token against `required_scopes`.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        required_scopes: &[String],
    ) -> Result<AuthRecord, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingBearer)?;

        let validated = self
            .provider
            .validate_token(token)
            .await
            .map_err(AuthError::InvalidToken)?;

        if !validated.extra.is_access_token() {
            return Err(AuthError::NotAccessToken);
        }

        let granted = validated.extra.authorized_scopes();
        if let Some(missing) = required_scopes.iter().find(|s| !granted.contains(s.as_str())) {
            return Err(AuthError::InsufficientScope(missing.clone()));
        }

        Ok(AuthRecord {
            subject: validated.subject,
            standard: validated.standard,
            extra: validated.extra,
        })
    }

    /// Wrap `next` so it only runs for requests carrying a valid access token
    /// with every scope in `required_scopes`.
    pub fn require_token(&self, next: Handler, required_scopes: Vec<String>) -> Handler {
        let gate = self.clone();
        let required_scopes: Arc<[String]> = required_scopes.into();

        handler_fn(move |mut req: Request<Body>| {
            let gate = gate.clone();
            let required_scopes = required_scopes.clone();
            let next = next.clone();
            async move {
                let outcome = gate.authenticate(req.headers(), &required_scopes).await;
                match outcome {
                    Ok(record) => {
                        req.extensions_mut().insert(record);
                        handler::call(&next, req).await
                    }
                    Err(error) => {
                        tracing::debug!(error = %error, path = %req.uri().path(), "Access token required");
                        error.status().into_response()
                    }
                }
            }
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
