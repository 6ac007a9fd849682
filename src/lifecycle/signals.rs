//! OS signal handling.
//!
//! # Design Decisions
//! - SIGINT and SIGTERM each trigger `Shutdown` once; the second one makes
//!   the server stop waiting for in-flight requests
//! - Uses Tokio's signal handling (async-safe)

use std::io;

use crate::lifecycle::Shutdown;

#[cfg(unix)]
async fn terminate(term: &mut tokio::signal::unix::Signal) {
    term.recv().await;
}

#[cfg(not(unix))]
async fn terminate(_term: &mut ()) {
    std::future::pending::<()>().await;
}

/// Forward termination signals into `shutdown` until the task is dropped.
pub async fn forward_signals(shutdown: Shutdown) -> io::Result<()> {
    #[cfg(unix)]
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(not(unix))]
    let mut term = ();

    let mut received = 0u32;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate(&mut term) => {}
        }
        received += 1;
        if received == 1 {
            tracing::info!("Shutdown signal received, draining");
        } else {
            tracing::warn!(signals = received, "Shutdown signal received again, forcing exit");
        }
        shutdown.trigger();
    }
}
