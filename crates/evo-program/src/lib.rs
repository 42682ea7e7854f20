//! Evolvable program representation
//!
//! Splits source text into a fixed skeleton and mutable evolve segments, and
//! applies SEARCH/REPLACE diffs to the segments only.
//!
//! # Core Concepts
//!
//! - [`Program`]: Immutable skeleton + evolve segments, with exact rendering
//! - [`Diff`]: Ordered [`DiffOperation`]s parsed from a diff text
//! - [`Patched`]: A candidate program plus the operations that missed
//! - [`ContentHash`]: Blake3 identity of a program's text
//!
//! # Example
//!
//! ```rust
//! use evo_program::Program;
//!
//! let seed = Program::parse(
//!     "seed",
//!     "a\n# EVOLVE-BLOCK-START\nx=1\n# EVOLVE-BLOCK-END\nb",
//! )?;
//! let patched = seed.apply_diff("<<<<<<< SEARCH\nx=1\n=======\nx=42\n>>>>>>> REPLACE");
//!
//! assert!(patched.is_complete());
//! assert_eq!(patched.program().text(), "a\n# EVOLVE-BLOCK-START\nx=42\n# EVOLVE-BLOCK-END\nb");
//! # Ok::<(), evo_program::ProgramError>(())
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod diff;
mod hash;
mod program;

pub use diff::{
    apply, ApplyPolicy, Diff, DiffApplyMiss, DiffError, DiffOperation, Patched, DIVIDER_MARKER,
    REPLACE_MARKER, SEARCH_MARKER,
};
pub use hash::ContentHash;
pub use program::{Program, ProgramError, EVOLVE_BLOCK_END, EVOLVE_BLOCK_START};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
