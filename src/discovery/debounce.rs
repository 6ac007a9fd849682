//! Settle-pass debouncing for discovery results.
//!
//! A worker process creates its socket file before it is guaranteed to be
//! listening, and several workers usually start together. Acting on the first
//! non-empty snapshot races them, so a target set is only accepted after it was
//! observed on two consecutive polls with identical membership.
//!
//! # State Transitions
//! ```text
//! (none) ──non-empty S──▶ candidate S ──S again──▶ Ready(S)
//!    ▲                        │
//!    └──empty / io error──────┘   (a different S' restarts the settle pass)
//! ```

use crate::discovery::socket_set::{DiscoveryError, TargetSet};

/// Number of consecutive equal observations required before acting.
pub const REQUIRED_OBSERVATIONS: u32 = 2;

const FIRST_WARNING_AFTER: u32 = 5;
const WARNING_EVERY: u32 = 60;

/// Outcome of feeding one poll result into the debouncer.
#[derive(Debug)]
pub enum Observation {
    /// Nothing usable yet. `warn` is set when this failure should be logged
    /// at warning level.
    Missing { error: DiscoveryError, warn: bool },
    /// A non-empty set was seen but has not settled yet.
    Settling { targets: usize },
    /// The set settled; build a proxy from it.
    Ready(TargetSet),
}

/// Tracks consecutive observations across polls.
#[derive(Debug, Default)]
pub struct Debounce {
    candidate: Option<TargetSet>,
    seen: u32,
    failures: u32,
}

impl Debounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the result of one discovery pass.
    ///
    /// Non-retryable errors are handed back as `Err` and leave the state
    /// untouched.
    pub fn observe(
        &mut self,
        result: Result<TargetSet, DiscoveryError>,
    ) -> Result<Observation, DiscoveryError> {
        match result {
            Ok(set) if !set.is_empty() => {
                self.failures = 0;
                match &self.candidate {
                    Some(candidate) if *candidate == set => self.seen += 1,
                    _ => {
                        self.candidate = Some(set);
                        self.seen = 1;
                    }
                }

                if self.seen >= REQUIRED_OBSERVATIONS {
                    self.seen = 0;
                    let ready = self.candidate.take().unwrap_or_default();
                    Ok(Observation::Ready(ready))
                } else {
                    Ok(Observation::Settling {
                        targets: self.candidate.as_ref().map_or(0, TargetSet::len),
                    })
                }
            }
            Ok(_) => Ok(self.missing(DiscoveryError::Empty {
                directory: Default::default(),
                pattern: String::new(),
            })),
            Err(error) if error.is_retryable() => Ok(self.missing(error)),
            Err(error) => Err(error),
        }
    }

    /// Consecutive failed polls since the last non-empty observation.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn missing(&mut self, error: DiscoveryError) -> Observation {
        self.candidate = None;
        self.seen = 0;
        self.failures = self.failures.saturating_add(1);
        Observation::Missing {
            error,
            warn: should_warn(self.failures),
        }
    }
}

/// Rate limit for "still waiting" warnings: the 5th failure, then every 60th.
pub fn should_warn(consecutive_failures: u32) -> bool {
    consecutive_failures == FIRST_WARNING_AFTER
        || (consecutive_failures > FIRST_WARNING_AFTER
            && (consecutive_failures - FIRST_WARNING_AFTER) % WARNING_EVERY == 0)
}
