//! Proxy lifecycle management.
//!
//! # Data Flow
//! ```text
//! ProxyManager task (one per proxied route)
//!     → discovery::discover every poll interval
//!     → discovery::Debounce (two equal consecutive observations)
//!     → UpstreamProxy::new over the settled set
//!     → ProxySlot::install (write lock held only for the swap)
//!
//! Request handlers
//!     → ProxySlot::current (clone of the Arc under a read lock)
//! ```

pub mod proxy_manager;
pub mod slot;

pub use proxy_manager::{ManagerError, ManagerSettings, ManagerState, ProxyManager, DEFAULT_POLL_INTERVAL};
pub use slot::ProxySlot;
