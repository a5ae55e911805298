//! Error reporting sink for failures filters recover from locally.

use std::io;
use tracing::warn;

/// Receives runtime failures that never reach the chain executor.
pub trait Diagnostics: Send + Sync {
    /// The response body stream failed while being drained.
    fn body_read_failed(&self, filter: &str, error: &io::Error);
}

/// Reports through the process-wide `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn body_read_failed(&self, filter: &str, error: &io::Error) {
        warn!(filter, error = %error, "Failed to read response body");
    }
}
