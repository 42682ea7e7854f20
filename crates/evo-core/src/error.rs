//! Error types for the evolution loop
//!
//! Only startup failures surface here, and every one of them aborts the run.
//! Generation and evaluation failures are recovered inside the loop and
//! reported as [`GenerationOutcome`](crate::GenerationOutcome)s instead.

use evo_program::ProgramError;
use evo_sandbox::EvaluationError;
use std::path::PathBuf;

/// Main evolution error type
#[derive(Debug, thiserror::Error)]
pub enum EvolveError {
    /// Seed program could not be loaded or parsed
    #[error("program error: {0}")]
    Program(#[from] ProgramError),

    /// Seed program failed evaluation; there is nothing to search from
    #[error("failed to evaluate initial program: {0}")]
    SeedEvaluation(#[source] EvaluationError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing a file failed
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EvolveError {
    /// Create configuration error
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
