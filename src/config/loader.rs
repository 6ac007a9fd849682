//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use url::Url;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {message}")]
    Env { name: &'static str, message: String },

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file into a config, without validating it.
pub fn load_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts the environment so tests need not mutate process state.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("GATEWAY_LISTEN") {
        config.listener.bind_address = v;
    }
    if let Some(v) = lookup("GATEWAY_ISS").filter(|v| !v.is_empty()) {
        let issuer = Url::parse(&v).map_err(|e| ConfigError::Env {
            name: "GATEWAY_ISS",
            message: e.to_string(),
        })?;
        config.oidc.issuer = Some(issuer);
    }
    if let Some(v) = lookup("GATEWAY_INSECURE") {
        config.oidc.insecure = parse_flag("GATEWAY_INSECURE", &v)?;
    }
    if let Some(v) = lookup("GATEWAY_CLIENT_ID") {
        config.oidc.client_id = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = lookup("GATEWAY_CLIENT_SECRET") {
        config.oidc.client_secret = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = lookup("GATEWAY_PLUGINS") {
        config.plugins.enabled = v;
    }
    if let Some(v) = lookup("GATEWAY_LOG_LEVEL") {
        config.observability.log_level = v;
    }

    let groupware = &mut config.groupware;
    if let Some(v) = lookup("GROUPWARE_SOCKETS") {
        groupware.sockets = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
    }
    if let Some(v) = lookup("GROUPWARE_REST_PATTERN").filter(|v| !v.is_empty()) {
        groupware.rest_pattern = v;
    }
    if let Some(v) = lookup("GROUPWARE_NOTIFY_PATTERN").filter(|v| !v.is_empty()) {
        groupware.notify_pattern = v;
    }
    if let Some(v) = lookup("GROUPWARE_REQUIRED_SCOPES") {
        groupware.required_scopes = v.split_whitespace().map(str::to_string).collect();
    }
    if let Some(v) = lookup("GROUPWARE_ALLOW_CORS") {
        groupware.allow_cors = parse_flag("GROUPWARE_ALLOW_CORS", &v)?;
    }
    if let Some(v) = lookup("GROUPWARE_ENABLE_API_V0") {
        groupware.enable_api_v0 = parse_flag("GROUPWARE_ENABLE_API_V0", &v)?;
    }
    if let Some(v) = lookup("GROUPWARE_STICKY") {
        groupware.sticky = Some(v).filter(|v| !v.trim().is_empty());
    }

    Ok(())
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Env {
            name,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Load and validate configuration: defaults, then the optional TOML file,
/// then the process environment, then `overrides` (command line flags).
pub fn load_config<F>(path: Option<&Path>, overrides: F) -> Result<GatewayConfig, ConfigError>
where
    F: FnOnce(&mut GatewayConfig),
{
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => GatewayConfig::default(),
    };
    apply_env(&mut config, |name| std::env::var(name).ok())?;
    overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
