//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and formats (bind address, grace period, URLs)
//! - Check that glob patterns and sticky rules parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::GatewayConfig;
use crate::discovery;
use crate::upstream::StickyRule;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("shutdown grace period must be positive")]
    ZeroShutdownGrace,

    #[error("issuer is required")]
    MissingIssuer,

    #[error("issuer must be an http(s) URL: {0}")]
    InvalidIssuer(String),

    #[error("invalid {field} pattern: {message}")]
    InvalidPattern { field: &'static str, message: String },

    #[error("invalid sticky rule: {0}")]
    InvalidSticky(String),

    #[error("poll interval must be positive")]
    ZeroPollInterval,

    #[error("unknown log format: {0}")]
    InvalidLogFormat(String),
}

/// Check everything serde cannot.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.socket_addr().is_none() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.timeouts.shutdown_grace_secs == 0 {
        errors.push(ValidationError::ZeroShutdownGrace);
    }

    match &config.oidc.issuer {
        None => errors.push(ValidationError::MissingIssuer),
        Some(issuer) if !matches!(issuer.scheme(), "http" | "https") => {
            errors.push(ValidationError::InvalidIssuer(issuer.to_string()))
        }
        Some(_) => {}
    }

    let groupware = &config.groupware;
    for (field, pattern) in [
        ("rest", &groupware.rest_pattern),
        ("notify", &groupware.notify_pattern),
    ] {
        if let Err(e) = discovery::validate_pattern(pattern) {
            errors.push(ValidationError::InvalidPattern {
                field,
                message: e.to_string(),
            });
        }
    }

    if let Some(rule) = &groupware.sticky {
        if let Err(e) = rule.parse::<StickyRule>() {
            errors.push(ValidationError::InvalidSticky(e.to_string()));
        }
    }

    if groupware.poll_interval_ms == 0 {
        errors.push(ValidationError::ZeroPollInterval);
    }

    if !matches!(config.observability.log_format.as_str(), "text" | "json") {
        errors.push(ValidationError::InvalidLogFormat(
            config.observability.log_format.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
