//! Resilience helpers shared by background clients.
//!
//! # Design Decisions
//! - Background retries back off exponentially with jitter so that many
//!   gateways restarting together do not hammer the identity provider
//! - Request-path retries live in the upstream proxy, bounded by `try_duration`

pub mod backoff;

pub use backoff::Backoff;
