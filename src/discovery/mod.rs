//! Backend worker discovery.
//!
//! # Data Flow
//! ```text
//! socket directory + glob pattern
//!     → socket_set.rs (list directory, match glob, dedupe)
//!     → TargetSet snapshot
//!     → debounce.rs (require two consecutive equal observations)
//!     → ProxyManager builds an UpstreamProxy
//! ```
//!
//! # Design Decisions
//! - Polling, not filesystem notifications: socket files are created by
//!   independent worker processes and may appear before they accept
//! - Snapshots compare as sets; ordering of directory entries is irrelevant
//! - Empty results are retryable, an invalid pattern is not
//! - Listing blocks, so managers run it through `scan` on the blocking pool

pub mod debounce;
pub mod socket_set;

pub use debounce::{Debounce, Observation};
pub use socket_set::{discover, scan, validate_pattern, DiscoveryError, TargetSet, UpstreamTarget};
