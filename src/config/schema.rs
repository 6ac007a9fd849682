//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Identity provider settings.
    pub oidc: OidcConfig,

    /// Which plugins to enable.
    pub plugins: PluginsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Settings of the groupware plugin.
    pub groupware: GroupwareConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8039").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8039".to_string(),
        }
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.bind_address.parse().ok()
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for in-flight requests to finish after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer identifier URL. Required by the gateway binary.
    pub issuer: Option<Url>,

    /// Disable TLS certificate verification towards the provider.
    pub insecure: bool,

    /// Client credentials for the introspection endpoint.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// How long startup waits for provider discovery before continuing.
    pub ready_timeout_secs: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            insecure: false,
            client_id: None,
            client_secret: None,
            ready_timeout_secs: 10,
        }
    }
}

/// Plugin selection.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    /// Comma separated plugin IDs, `none`, or empty for all registered.
    pub enabled: String,
}

/// Parsed form of `PluginsConfig::enabled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSelection {
    All,
    None,
    Only(Vec<String>),
}

impl PluginsConfig {
    pub fn selection(&self) -> PluginSelection {
        let raw = self.enabled.trim();
        if raw.is_empty() {
            return PluginSelection::All;
        }
        if raw.eq_ignore_ascii_case("none") {
            return PluginSelection::None;
        }
        PluginSelection::Only(
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter, overridden by `RUST_LOG`.
    pub log_level: String,

    /// `text` or `json`.
    pub log_format: String,

    pub log_timestamp: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_timestamp: true,
        }
    }
}

/// Groupware plugin configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GroupwareConfig {
    /// Directory holding the worker sockets. Required by the groupware plugin.
    pub sockets: Option<PathBuf>,

    /// Glob for REST worker sockets.
    pub rest_pattern: String,

    /// Glob for notification worker sockets.
    pub notify_pattern: String,

    /// Scopes every v1 token must carry.
    pub required_scopes: Vec<String>,

    /// Answer CORS requests permissively.
    pub allow_cors: bool,

    /// Serve the legacy v0 API paths.
    pub enable_api_v0: bool,

    /// Sticky session rule applied to the REST proxy.
    pub sticky: Option<String>,

    /// Socket directory poll interval.
    pub poll_interval_ms: u64,
}

impl Default for GroupwareConfig {
    fn default() -> Self {
        Self {
            sockets: None,
            rest_pattern: "rest*.sock".to_string(),
            notify_pattern: "notify*.sock".to_string(),
            required_scopes: vec!["profile".to_string(), "email".to_string(), "groupware".to_string()],
            allow_cors: false,
            enable_api_v0: false,
            sticky: None,
            poll_interval_ms: 1000,
        }
    }
}

impl GroupwareConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
