//! socket-gateway binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use url::Url;

use socket_gateway::auth::{OidcProvider, OidcSettings};
use socket_gateway::config::{self, GatewayConfig};
use socket_gateway::http::ServerError;
use socket_gateway::lifecycle::{signals, Gateway, Shutdown};
use socket_gateway::observability::logging;
use socket_gateway::plugins::PluginRegistry;

#[derive(Parser, Debug)]
#[command(name = "socket-gateway", version, about = "HTTP API gateway for unix socket workers")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8039.
    #[arg(long)]
    listen: Option<String>,

    /// OIDC issuer identifier.
    #[arg(long)]
    iss: Option<Url>,

    /// Disable TLS certificate verification towards the issuer.
    #[arg(long)]
    insecure: bool,

    /// Comma separated plugin IDs, or `none`.
    #[arg(long)]
    plugins: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(iss) = self.iss {
            config.oidc.issuer = Some(iss);
        }
        if self.insecure {
            config.oidc.insecure = true;
        }
        if let Some(plugins) = self.plugins {
            config.plugins.enabled = plugins;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let path = cli.config.clone();
    let config = config::load_config(path.as_deref(), |config| cli.apply(config))?;
    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        plugins = %config.plugins.enabled,
        "socket-gateway starting"
    );

    let cancel = CancellationToken::new();
    let provider = OidcProvider::new(
        OidcSettings {
            client_id: config.oidc.client_id.clone(),
            client_secret: config.oidc.client_secret.clone(),
            insecure: config.oidc.insecure,
            ..OidcSettings::default()
        },
        cancel.child_token(),
    )?;

    let registry = PluginRegistry::builtin();
    tracing::debug!(registry = ?registry, "Plugins registered");

    let gateway = Gateway::start(config, &registry, Arc::new(provider.clone()), cancel).await?;
    tracing::info!(address = %gateway.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = signals::forward_signals(shutdown).await {
                tracing::error!(error = %error, "Signal handling failed");
            }
        }
    });

    let result = gateway.serve_with(&shutdown, signal).await;
    signals.abort();
    provider.stopped().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}
