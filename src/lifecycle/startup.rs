//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the identity provider and wait (bounded) for it
//! - Instantiate and initialize the enabled plugins in order
//! - Bind the listener, serve, then close plugins and cancel background work
//!
//! # Design Decisions
//! - Fail fast: a plugin initialization error aborts startup
//! - The listener binds last, after every plugin is ready
//! - A background plugin fault shuts the gateway down with an error

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthGate, IdentityProvider};
use crate::config::GatewayConfig;
use crate::http::server::{GatewayServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::plugins::{Dispatcher, GatewayServices, PluginContext, PluginError, PluginRegistry};

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// A started gateway: plugins initialized, listener bound, not yet serving.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
    errors: mpsc::Receiver<PluginError>,
    cancel: CancellationToken,
}

impl Gateway {
    /// Bring up everything in dependency order.
    ///
    /// `cancel` is the shared token handed to plugins; it is cancelled once
    /// the gateway stops.
    pub async fn start(
        config: GatewayConfig,
        registry: &PluginRegistry,
        provider: Arc<dyn IdentityProvider>,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let config = Arc::new(config);

        if let Some(issuer) = config.oidc.issuer.clone() {
            provider.initialize(issuer.clone()).await?;
            let timeout = std::time::Duration::from_secs(config.oidc.ready_timeout_secs);
            match provider.wait_until_ready(timeout).await {
                Ok(()) => tracing::info!(issuer = %issuer, "Identity provider ready"),
                Err(error) => tracing::warn!(
                    issuer = %issuer,
                    error = %error,
                    "Identity provider not ready, continuing"
                ),
            }
        } else {
            tracing::warn!("No issuer configured, identity provider not initialized");
        }

        let plugins = registry.instantiate(&config.plugins.selection());
        let dispatcher = Arc::new(Dispatcher::new(plugins));

        let (errors_tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let ctx = PluginContext {
            cancel: cancel.clone(),
            errors: errors_tx,
            services: GatewayServices::new(config.clone(), AuthGate::new(provider)),
        };
        if let Err(error) = dispatcher.initialize(&ctx).await {
            dispatcher.close().await;
            cancel.cancel();
            return Err(error.into());
        }

        let address = config.listener.bind_address.clone();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                dispatcher.close().await;
                cancel.cancel();
                return Err(ServerError::Bind { address, source });
            }
        };

        Ok(Self {
            config,
            dispatcher,
            listener,
            errors,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Serve until `shutdown` fires or a plugin reports a background fault.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let signal = shutdown.subscribe();
        self.serve_with(shutdown, signal).await
    }

    /// Like `serve`, listening on a receiver the caller subscribed earlier.
    ///
    /// Triggers sent after `signal` was created are observed even if they
    /// happen before serving starts.
    pub async fn serve_with(self, shutdown: &Shutdown, signal: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let Self {
            config,
            dispatcher,
            listener,
            mut errors,
            cancel,
        } = self;

        let server = GatewayServer::new(&config, dispatcher.clone());
        dispatcher.start_serving();

        let run = server.run(listener, signal);
        tokio::pin!(run);

        let mut fault = None;
        let served = tokio::select! {
            result = &mut run => result,
            Some(error) = errors.recv() => {
                tracing::error!(error = %error, "Background failure, shutting down");
                fault = Some(error);
                shutdown.trigger();
                (&mut run).await
            }
        };

        dispatcher.close().await;
        cancel.cancel();
        tracing::info!("Shutdown complete");

        served?;
        match fault {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}
