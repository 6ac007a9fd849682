//! OpenID Connect identity provider client.
//!
//! # Responsibilities
//! - Fetch the issuer's discovery document in the background, with backoff
//! - Validate bearer tokens through the provider's introspection endpoint
//! - Cache introspection results until expiry, at most one minute
//! - Sweep expired cache entries once a minute
//!
//! # Design Decisions
//! - No local token cryptography; the provider is the authority
//! - Readiness is a `watch` channel so any number of callers can wait on it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::auth::provider::{IdentityProvider, ProviderError, ValidatedToken};
use crate::auth::record::{ExtraClaims, StandardClaims, ACCESS_TOKEN_CLAIM};
use crate::resilience::Backoff;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const MAX_CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_PRUNE_THRESHOLD: usize = 1024;
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Client credentials and transport options.
#[derive(Debug, Clone, Default)]
pub struct OidcSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Skip TLS certificate verification of provider requests.
    pub insecure: bool,
    pub request_timeout: Option<Duration>,
    /// Retry schedule for discovery.
    pub backoff: Backoff,
}

/// The subset of the discovery document the gateway uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    #[serde(default)]
    pub introspection_endpoint: Option<Url>,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub jwks_uri: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(flatten)]
    claims: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: ValidatedToken,
    expires_at: Instant,
}

struct Inner {
    client: reqwest::Client,
    settings: OidcSettings,
    initialized: AtomicBool,
    metadata: watch::Sender<Option<Arc<ProviderMetadata>>>,
    cache: DashMap<String, CachedToken>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Identity provider backed by an OIDC issuer.
#[derive(Clone)]
pub struct OidcProvider {
    inner: Arc<Inner>,
}

impl OidcProvider {
    /// Background discovery stops when `cancel` fires.
    pub fn new(settings: OidcSettings, cancel: CancellationToken) -> Result<Self, ProviderError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(settings.insecure);
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        if settings.insecure {
            tracing::warn!("TLS certificate verification disabled for identity provider requests");
        }

        let (metadata, _) = watch::channel(None);
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                settings,
                initialized: AtomicBool::new(false),
                metadata,
                cache: DashMap::new(),
                cancel,
                tasks: TaskTracker::new(),
            }),
        })
    }

    /// Discovery document, once fetched.
    pub fn metadata(&self) -> Option<Arc<ProviderMetadata>> {
        self.inner.metadata.borrow().clone()
    }

    /// Number of cached token validations.
    pub fn cached_tokens(&self) -> usize {
        self.inner.cache.len()
    }

    /// Wait for background discovery and the cache sweep to stop.
    ///
    /// Only returns once the cancellation token given to `new` has fired.
    pub async fn stopped(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn spawn_cache_sweep(&self, period: Duration) {
        self.inner.tasks.spawn(self.inner.clone().sweep_cache(period));
    }
}

impl Inner {
    async fn fetch_metadata(&self, url: &Url, issuer: &str) -> Result<ProviderMetadata, ProviderError> {
        let metadata: ProviderMetadata = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(ProviderError::Discovery(format!(
                "issuer mismatch: expected {issuer}, got {}",
                metadata.issuer
            )));
        }
        Ok(metadata)
    }

    async fn discover(self: Arc<Self>, issuer: Url) {
        let issuer_str = issuer.as_str().trim_end_matches('/').to_string();
        let url = match Url::parse(&format!("{issuer_str}/{DISCOVERY_PATH}")) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(issuer = %issuer_str, error = %e, "Invalid discovery URL");
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.fetch_metadata(&url, &issuer_str) => result,
            };

            match result {
                Ok(metadata) => {
                    if metadata.introspection_endpoint.is_none() {
                        tracing::warn!(issuer = %issuer_str, "Provider does not advertise an introspection endpoint");
                    }
                    tracing::info!(issuer = %issuer_str, attempts = attempt, "Identity provider discovery complete");
                    self.metadata.send_replace(Some(Arc::new(metadata)));
                    return;
                }
                Err(error) => {
                    let delay = self.settings.backoff.delay(attempt);
                    tracing::warn!(
                        issuer = %issuer_str,
                        attempt,
                        retry_in = ?delay,
                        error = %error,
                        "Identity provider discovery failed"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn introspect(&self, token: &str) -> Result<ValidatedToken, ProviderError> {
        let metadata = self
            .metadata
            .borrow()
            .clone()
            .ok_or_else(|| ProviderError::Discovery("provider discovery has not completed".into()))?;
        let endpoint = metadata
            .introspection_endpoint
            .clone()
            .ok_or_else(|| ProviderError::Discovery("no introspection endpoint".into()))?;

        let mut request = self
            .client
            .post(endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(client_id) = &self.settings.client_id {
            request = request.basic_auth(client_id, self.settings.client_secret.as_deref());
        }

        let response: IntrospectionResponse = request.send().await?.error_for_status()?.json().await?;
        if !response.active {
            return Err(ProviderError::Inactive);
        }
        let subject = response
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Rejected("missing subject".into()))?;

        let mut claims = response.claims;
        let standard: StandardClaims = serde_json::from_value(Value::Object(claims.clone()))
            .map_err(|e| ProviderError::Rejected(format!("malformed claims: {e}")))?;
        let standard = StandardClaims {
            sub: subject.clone(),
            ..standard
        };

        if let Some(exp) = standard.exp {
            if exp <= unix_now() {
                return Err(ProviderError::Inactive);
            }
        }

        if !claims.contains_key(ACCESS_TOKEN_CLAIM) {
            let is_access = !matches!(
                claims.get("token_type").and_then(Value::as_str),
                Some(t) if t.eq_ignore_ascii_case("refresh_token")
            );
            claims.insert(ACCESS_TOKEN_CLAIM.to_string(), Value::Bool(is_access));
        }

        Ok(ValidatedToken {
            subject,
            standard,
            extra: ExtraClaims(claims),
        })
    }

    async fn sweep_cache(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let evicted = self.purge_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.cache.len(), "Expired token validations evicted");
                    }
                }
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        let now = Instant::now();
        self.cache.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.cache.len())
    }

    fn cache_entry(&self, token: &str, validated: &ValidatedToken) {
        let mut ttl = MAX_CACHE_TTL;
        if let Some(exp) = validated.standard.exp {
            ttl = ttl.min(Duration::from_secs(exp.saturating_sub(unix_now())));
        }
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        if self.cache.len() >= CACHE_PRUNE_THRESHOLD {
            self.cache.retain(|_, entry| entry.expires_at > now);
        }
        self.cache.insert(
            token.to_string(),
            CachedToken {
                token: validated.clone(),
                expires_at: now + ttl,
            },
        );
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn initialize(&self, issuer: Url) -> Result<(), ProviderError> {
        if !matches!(issuer.scheme(), "http" | "https") {
            return Err(ProviderError::Discovery(format!(
                "issuer must be an http(s) URL: {issuer}"
            )));
        }
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(issuer = %issuer, "Starting identity provider discovery");
        self.inner.tasks.spawn(self.inner.clone().discover(issuer));
        self.spawn_cache_sweep(CACHE_SWEEP_INTERVAL);
        Ok(())
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ProviderError> {
        if !self.inner.initialized.load(Ordering::Acquire) {
            return Err(ProviderError::NotInitialized);
        }
        let mut ready = self.inner.metadata.subscribe();
        let result = match tokio::time::timeout(timeout, ready.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ProviderError::NotInitialized),
            Err(_) => Err(ProviderError::NotReady(timeout)),
        };
        result
    }

    async fn validate_token(&self, token: &str) -> Result<ValidatedToken, ProviderError> {
        if let Some(entry) = self.inner.cache.get(token) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.token.clone());
            }
        }
        self.inner.cache.remove(token);

        let validated = self.inner.introspect(token).await?;
        self.inner.cache_entry(token, &validated);
        Ok(validated)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_requires_initialize() {
        let provider = OidcProvider::new(OidcSettings::default(), CancellationToken::new()).unwrap();
        assert!(matches!(
            provider.wait_until_ready(Duration::from_millis(10)).await,
            Err(ProviderError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_http_issuer() {
        let provider = OidcProvider::new(OidcSettings::default(), CancellationToken::new()).unwrap();
        let issuer = Url::parse("ftp://issuer.example").unwrap();
        assert!(provider.initialize(issuer).await.is_err());
    }

    fn cached(subject: &str, ttl: Duration) -> CachedToken {
        CachedToken {
            token: ValidatedToken {
                subject: subject.to_string(),
                standard: StandardClaims::default(),
                extra: ExtraClaims(Map::new()),
            },
            expires_at: Instant::now() + ttl,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_expired_entries() {
        let cancel = CancellationToken::new();
        let provider = OidcProvider::new(OidcSettings::default(), cancel.clone()).unwrap();
        provider.inner.cache.insert("short".into(), cached("a", Duration::from_secs(5)));
        provider.inner.cache.insert("long".into(), cached("b", Duration::from_secs(600)));

        provider.spawn_cache_sweep(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.cached_tokens(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(provider.cached_tokens(), 1);
        assert!(provider.inner.cache.contains_key("long"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), provider.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validate_before_discovery_fails() {
        let provider = OidcProvider::new(OidcSettings::default(), CancellationToken::new()).unwrap();
        assert!(matches!(
            provider.validate_token("abc").await,
            Err(ProviderError::Discovery(_))
        ));
    }
}
