use crate::ServiceError;

/// Receives playback faults that cannot be returned to a caller.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, error: &ServiceError);
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, error: &ServiceError) {
        tracing::error!(%error, "{context}");
    }
}
