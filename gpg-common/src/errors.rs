//! Error taxonomy for the signal engine.
//!
//! Data absence is not an error: read paths resolve missing clusters or
//! agents through documented fallback priors and return values, never
//! failures. Invalid configuration is clamped and logged at load time.
//! The variants here cover the cases that do surface as `Result`s: an
//! unreachable record store and job-level failures.

use thiserror::Error;

/// Errors surfaced by the execution/cluster store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record store is unreachable. Recomputation jobs abort the
    /// invocation and leave previously committed snapshots untouched.
    #[error("execution store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors surfaced by recomputation jobs.
///
/// A job that runs out of wall-clock budget is not an error: it
/// checkpoints and reports partial completion through its summary.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_message_names_reason() {
        let err = StoreError::Unavailable {
            reason: "poisoned lock".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "execution store unavailable: poisoned lock"
        );
    }

    #[test]
    fn test_job_error_wraps_store_error() {
        let err: JobError = StoreError::Unavailable {
            reason: "gone".to_string(),
        }
        .into();
        assert!(err.to_string().contains("unavailable"));
    }
}
