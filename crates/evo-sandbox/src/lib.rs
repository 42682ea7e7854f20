//! Sandboxed candidate evaluation
//!
//! Runs a candidate program's evaluation routine in a separate worker
//! process with a wall-clock timeout, returning [`Scores`] or a typed
//! [`EvaluationError`]. Nothing the candidate does can touch the caller's
//! process state.
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_sandbox::SandboxEvaluator;
//! use evo_program::Program;
//!
//! let evaluator = SandboxEvaluator::python("eval.py");
//! let program = Program::load("seed.py")?;
//! match evaluator.execute(&program).await {
//!     Ok(scores) => println!("scores: {scores}"),
//!     Err(e) => println!("evaluation failed: {e}"),
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod evaluator;
mod runtime;
mod scores;

pub use error::SandboxError;
pub use evaluator::{ProgramEvaluator, SandboxConfig, SandboxEvaluator};
pub use runtime::{
    CommandRuntime, PythonRuntime, RuntimeSpec, WorkerCommand, WorkerRuntime, CANDIDATE_ENV,
    WORKSPACE_ENV,
};
pub use scores::{EvaluationError, EvaluationResult, Scores};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
