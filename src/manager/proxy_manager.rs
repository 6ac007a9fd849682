//! Background task that turns a socket directory into a live proxy.
//!
//! # State Transitions
//! ```text
//! Searching ──non-empty set──▶ Settling ──same set again──▶ Active
//!     ▲                           │
//!     └──────empty / io error─────┘
//!
//! any state ──cancelled──▶ Closed
//! ```
//!
//! Once Active the manager stops polling. Workers that appear or disappear
//! afterwards are not picked up; failed ones are routed around by the proxy's
//! health accounting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::discovery::{self, Debounce, DiscoveryError, Observation};
use crate::manager::slot::ProxySlot;
use crate::observability::metrics;
use crate::upstream::{ProxyConfiguration, ProxyError, UpstreamProxy};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Searching,
    Settling,
    Active,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("discovery for proxy {proxy} failed: {source}")]
    Discovery {
        proxy: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("building proxy {proxy} failed: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: ProxyError,
    },
}

/// Where to look for workers and how to proxy to them.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Name used in logs and metrics.
    pub name: String,
    pub directory: PathBuf,
    pub pattern: String,
    pub poll_interval: Duration,
    pub proxy: ProxyConfiguration,
}

impl ManagerSettings {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            pattern: pattern.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            proxy: ProxyConfiguration::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfiguration) -> Self {
        self.proxy = proxy;
        self
    }
}

pub struct ProxyManager {
    settings: ManagerSettings,
    slot: Arc<ProxySlot>,
    state: watch::Sender<ManagerState>,
    builds: AtomicUsize,
}

impl ProxyManager {
    pub fn new(settings: ManagerSettings, slot: Arc<ProxySlot>) -> Self {
        let (state, _) = watch::channel(ManagerState::Searching);
        Self {
            settings,
            slot,
            state,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn slot(&self) -> &Arc<ProxySlot> {
        &self.slot
    }

    pub fn state(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }

    /// Number of proxies this manager has built and installed.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn transition(&self, next: ManagerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(proxy = %self.settings.name, from = ?previous, to = ?next, "Proxy manager state changed");
        }
    }

    /// Poll until a target set settles, then build and install a proxy.
    ///
    /// Returns `Ok(None)` when cancelled first. Invalid patterns and invalid
    /// proxy configurations are returned as errors; everything else is
    /// retried on the next poll.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Option<Arc<UpstreamProxy>>, ManagerError> {
        let result = self.poll_until_ready(&cancel).await;
        match &result {
            Ok(Some(_)) => {}
            Ok(None) => self.transition(ManagerState::Closed),
            Err(error) => {
                tracing::error!(proxy = %self.settings.name, error = %error, "Proxy manager stopped");
                self.transition(ManagerState::Closed);
            }
        }
        result
    }

    async fn poll_until_ready(&self, cancel: &CancellationToken) -> Result<Option<Arc<UpstreamProxy>>, ManagerError> {
        let name = &self.settings.name;
        discovery::validate_pattern(&self.settings.pattern).map_err(|source| ManagerError::Discovery {
            proxy: name.clone(),
            source,
        })?;

        tracing::info!(
            proxy = %name,
            directory = %self.settings.directory.display(),
            pattern = %self.settings.pattern,
            "Searching for upstream sockets"
        );

        let mut debounce = Debounce::new();
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = ticker.tick() => {}
            }

            let scan = discovery::scan(self.settings.directory.clone(), self.settings.pattern.clone());
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                result = scan => result,
            };
            let observation = debounce.observe(result).map_err(|source| ManagerError::Discovery {
                proxy: name.clone(),
                source,
            })?;

            match observation {
                Observation::Missing { error, warn } => {
                    self.transition(ManagerState::Searching);
                    if warn {
                        tracing::warn!(
                            proxy = %name,
                            failures = debounce.failures(),
                            error = %error,
                            "Still waiting for upstream sockets"
                        );
                    } else {
                        tracing::debug!(proxy = %name, error = %error, "No upstream sockets yet");
                    }
                }
                Observation::Settling { targets } => {
                    self.transition(ManagerState::Settling);
                    tracing::debug!(proxy = %name, targets, "Upstream sockets found, settling");
                }
                Observation::Ready(targets) => {
                    let proxy = UpstreamProxy::new(name.clone(), &targets, self.settings.proxy.clone())
                        .map_err(|source| ManagerError::Proxy {
                            proxy: name.clone(),
                            source,
                        })?;
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }

                    let proxy = Arc::new(proxy);
                    self.slot.install(proxy.clone());
                    self.builds.fetch_add(1, Ordering::Relaxed);
                    metrics::record_proxy_install(name);
                    self.transition(ManagerState::Active);

                    tracing::info!(
                        proxy = %name,
                        targets = targets.len(),
                        policy = %self.settings.proxy.policy,
                        "Proxy installed"
                    );
                    return Ok(Some(proxy));
                }
            }
        }
    }

    /// Run the manager and keep the installed proxy until cancellation.
    ///
    /// On cancellation the slot is cleared so the proxy is released once its
    /// in-flight requests finish.
    pub async fn supervise(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ManagerError> {
        if self.run(cancel.clone()).await?.is_some() {
            cancel.cancelled().await;
            self.slot.clear();
            self.transition(ManagerState::Closed);
        }
        Ok(())
    }
}
