//! Typed proxy configuration.

use std::time::Duration;

use crate::upstream::error::ProxyError;
use crate::upstream::policy::Policy;
use crate::upstream::sticky::StickyRule;

/// Settings for one `UpstreamProxy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfiguration {
    /// Load-balancing policy.
    pub policy: Policy,
    /// Window during which failures are counted against an upstream.
    /// Zero disables failure accounting.
    pub fail_timeout: Duration,
    /// Failures inside the window that mark an upstream down. Zero never marks down.
    pub max_fails: u32,
    /// Concurrent requests per upstream, zero is unlimited.
    pub max_conns: usize,
    /// Idle keep-alive connections retained per upstream.
    pub keepalive: usize,
    /// How long to keep looking for an available upstream. Zero tries once.
    pub try_duration: Duration,
    /// Pause between attempts within `try_duration`.
    pub try_interval: Duration,
    pub sticky: Option<StickyRule>,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            policy: Policy::Random,
            fail_timeout: Duration::ZERO,
            max_fails: 1,
            max_conns: 0,
            keepalive: 8,
            try_duration: Duration::ZERO,
            try_interval: Duration::from_millis(250),
            sticky: None,
        }
    }
}

impl ProxyConfiguration {
    pub fn validate(&self) -> Result<(), ProxyError> {
        if !self.try_duration.is_zero() && self.try_interval.is_zero() {
            return Err(ProxyError::InvalidConfiguration(
                "try_interval must be positive when try_duration is set".into(),
            ));
        }
        if let (Some(rule), Policy::Header(name)) = (&self.sticky, &self.policy) {
            if rule.header_name() != Some(name) {
                tracing::warn!(
                    policy_header = %name,
                    "Sticky rule does not set the header used by the policy"
                );
            }
        }
        Ok(())
    }
}
