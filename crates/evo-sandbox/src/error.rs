//! Host-side sandbox failures
//!
//! These never reach the controller directly: the evaluator folds them into
//! [`EvaluationError::Exception`](crate::EvaluationError::Exception).

use std::io;

/// Failure to prepare, launch, or supervise a worker
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Private workspace directory could not be created
    #[error("failed to create worker workspace: {0}")]
    Workspace(#[source] io::Error),

    /// Writing or locating a worker input failed
    #[error("failed to stage {what}: {source}")]
    Stage {
        what: String,
        #[source]
        source: io::Error,
    },

    /// Worker process could not be started
    #[error("failed to spawn {runtime} worker: {source}")]
    Spawn {
        runtime: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the worker failed
    #[error("failed to wait for worker: {0}")]
    Wait(#[source] io::Error),
}
