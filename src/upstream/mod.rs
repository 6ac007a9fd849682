//! Load-balancing reverse proxy over local domain sockets.
//!
//! # Data Flow
//! ```text
//! Request handed over by a plugin
//!     → sticky.rs (optional: cookie → upstream header)
//!     → forward.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → proxy.rs (select an available upstream, retry within try_duration)
//!         - policy.rs (random, least_conn, round_robin, first, uri_hash, header)
//!         - target.rs (health window, connection cap, RAII guard)
//!     → pool.rs (reuse an idle keep-alive connection or dial the socket)
//!     → Response streamed back; connection returned to the pool at EOF
//! ```
//!
//! # Design Decisions
//! - A proxy is immutable once built; topology changes produce a new proxy
//! - Health state lives on the upstream, selection policies are stateless
//!   except for the round-robin cursor
//! - Only failures before the request is written are retried, the body
//!   is not buffered for replay

pub mod config;
pub mod error;
pub mod forward;
pub mod policy;
pub mod pool;
pub mod proxy;
pub mod sticky;
pub mod target;

pub use config::ProxyConfiguration;
pub use error::ProxyError;
pub use policy::Policy;
pub use proxy::UpstreamProxy;
pub use sticky::StickyRule;
pub use target::{Upstream, UpstreamGuard};
