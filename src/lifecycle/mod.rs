//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Provider → Plugins (in order) → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain (bounded) → Close plugins → Cancel
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown; a second one forces exit
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Gateway;
