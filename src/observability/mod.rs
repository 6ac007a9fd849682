//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (proxy, upstream, plugin)
//!     → metrics.rs counters
//!
//! logging.rs installs the subscriber once at startup.
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Counters go through the `metrics` facade; no exporter is installed here

pub mod logging;
pub mod metrics;
