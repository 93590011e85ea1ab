//! Ctrl-C handling.
//!
//! The first interrupt cancels the run: rooms that have not started are
//! not admitted and running rooms stop at their next entity boundary, so
//! the partial report is still produced.

use tokio_util::sync::CancellationToken;

/// Cancels `cancel` when Ctrl-C is received. Must be called inside a
/// tokio runtime.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::warn!("interrupt received, finishing in-flight requests");
                    cancel.cancel();
                }
                Err(err) => tracing::warn!(error = %err, "could not listen for Ctrl-C"),
            },
            _ = cancel.cancelled() => {}
        }
    });
}
