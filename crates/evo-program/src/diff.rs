//! SEARCH/REPLACE diffs over evolve segments
//!
//! A diff text holds any number of blocks of the form
//!
//! ```text
//! <<<<<<< SEARCH
//! original text
//! =======
//! replacement text
//! >>>>>>> REPLACE
//! ```
//!
//! Each block becomes one [`DiffOperation`]. Operations only ever touch
//! evolve segments; the skeleton of a [`Program`] is never searched.

use crate::program::Program;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Line opening the search half of a block
pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";

/// Line separating search and replace halves
pub const DIVIDER_MARKER: &str = "=======";

/// Line closing a block
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"(?s){}\n(.*?)\n{}\n(.*?)\n{}",
            regex::escape(SEARCH_MARKER),
            regex::escape(DIVIDER_MARKER),
            regex::escape(REPLACE_MARKER),
        );
        Regex::new(&pattern).unwrap_or_else(|e| unreachable!("static diff pattern: {e}"))
    })
}

/// One search/replace instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOperation {
    search: String,
    replace: String,
}

impl DiffOperation {
    /// Create operation
    #[inline]
    #[must_use]
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// Text to locate
    #[inline]
    #[must_use]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Text substituted for the first occurrence
    #[inline]
    #[must_use]
    pub fn replace(&self) -> &str {
        &self.replace
    }
}

/// Ordered operations extracted from a diff text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    operations: Vec<DiffOperation>,
}

impl Diff {
    /// Extract all well-formed blocks, left to right
    ///
    /// Text outside blocks, and blocks missing any marker line, is ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let operations = block_pattern()
            .captures_iter(text)
            .map(|caps| DiffOperation::new(&caps[1], &caps[2]))
            .collect();
        Self { operations }
    }

    /// Operations in application order
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[DiffOperation] {
        &self.operations
    }

    /// Number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the diff holds no operations
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Apply to a program; see [`apply`]
    #[must_use]
    pub fn apply_to(&self, program: &Program) -> Patched {
        apply(program, &self.operations)
    }
}

impl FromIterator<DiffOperation> for Diff {
    fn from_iter<I: IntoIterator<Item = DiffOperation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

/// An operation whose search text matched no segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffApplyMiss {
    /// Position of the operation in the diff
    pub operation: usize,
    /// The search text that was not found
    pub search: String,
}

/// How unresolved operations affect a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyPolicy {
    /// Skip unresolved operations and keep the rest
    #[default]
    Partial,
    /// Reject the candidate if any operation is unresolved
    Strict,
}

/// Result of applying operations to a program
#[derive(Debug, Clone)]
pub struct Patched {
    program: Program,
    resolved: usize,
    misses: Vec<DiffApplyMiss>,
}

impl Patched {
    /// Patched program (partial application)
    #[inline]
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Number of operations that were applied
    #[inline]
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.resolved
    }

    /// Operations that matched nothing
    #[inline]
    #[must_use]
    pub fn misses(&self) -> &[DiffApplyMiss] {
        &self.misses
    }

    /// Whether every operation was applied
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.misses.is_empty()
    }

    /// Take the program regardless of misses
    #[inline]
    #[must_use]
    pub fn into_program(self) -> Program {
        self.program
    }

    /// Take the program only if every operation was applied
    ///
    /// # Errors
    /// Returns [`DiffError::Unresolved`] if any operation missed
    pub fn into_strict(self) -> Result<Program, DiffError> {
        if self.misses.is_empty() {
            Ok(self.program)
        } else {
            Err(DiffError::Unresolved {
                misses: self.misses,
            })
        }
    }

    /// Take the program under the given policy
    ///
    /// # Errors
    /// Returns [`DiffError::Unresolved`] under [`ApplyPolicy::Strict`] if any
    /// operation missed
    pub fn under(self, policy: ApplyPolicy) -> Result<Program, DiffError> {
        match policy {
            ApplyPolicy::Partial => Ok(self.into_program()),
            ApplyPolicy::Strict => self.into_strict(),
        }
    }
}

/// Apply operations in order to the program's evolve segments
///
/// Each operation replaces the first occurrence of its search text in the
/// lowest-indexed segment containing it. Later operations see the effect of
/// earlier ones. Operations that match no segment are recorded as misses and
/// do not stop the rest. The skeleton is shared with `program` unchanged.
#[must_use]
pub fn apply(program: &Program, operations: &[DiffOperation]) -> Patched {
    let mut segments = program.segment_vector().clone();
    let mut misses = Vec::new();
    let mut resolved = 0;

    for (index, op) in operations.iter().enumerate() {
        match segments.iter().position(|segment| segment.contains(op.search())) {
            Some(target) => {
                let patched = segments[target].replacen(op.search(), op.replace(), 1);
                segments.set(target, Arc::from(patched));
                resolved += 1;
            }
            None => {
                tracing::warn!(
                    origin = program.origin(),
                    operation = index,
                    "could not find SEARCH block in any evolve segment"
                );
                misses.push(DiffApplyMiss {
                    operation: index,
                    search: op.search().to_string(),
                });
            }
        }
    }

    Patched {
        program: program.with_segments(segments),
        resolved,
        misses,
    }
}

impl Program {
    /// Parse `diff_text` and apply it to this program
    #[must_use]
    pub fn apply_diff(&self, diff_text: &str) -> Patched {
        Diff::parse(diff_text).apply_to(self)
    }
}

/// Errors from diff application
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Strict policy: some operations matched nothing
    #[error("{} diff operation(s) matched no evolve segment", .misses.len())]
    Unresolved { misses: Vec<DiffApplyMiss> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const SEED: &str = "a\n# EVOLVE-BLOCK-START\nx=1\n# EVOLVE-BLOCK-END\nb\n# EVOLVE-BLOCK-START\ny=2\n# EVOLVE-BLOCK-END\nc";

    fn block(search: &str, replace: &str) -> String {
        format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}")
    }

    fn seed() -> Program {
        Program::parse("seed", SEED).unwrap()
    }

    #[test]
    fn parse_extracts_blocks_in_order() {
        let text = format!(
            "Here is my idea.\n{}\nand also\n{}\ntrailing",
            block("x=1", "x=42"),
            block("y=2", "y=3\nz=4")
        );
        let diff = Diff::parse(&text);

        assert_eq!(
            diff.operations(),
            &[DiffOperation::new("x=1", "x=42"), DiffOperation::new("y=2", "y=3\nz=4")]
        );
    }

    #[test]
    fn parse_keeps_multiline_spans_verbatim() {
        let diff = Diff::parse(&block("def f():\n    return 1", "def f():\n    return 2"));
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.operations()[0].search(), "def f():\n    return 1");
        assert_eq!(diff.operations()[0].replace(), "def f():\n    return 2");
    }

    #[test]
    fn parse_ignores_malformed_blocks() {
        let text = "<<<<<<< SEARCH\nx=1\n>>>>>>> REPLACE\nno divider here";
        assert!(Diff::parse(text).is_empty());
        assert!(Diff::parse("").is_empty());
    }

    #[test]
    fn apply_patches_first_matching_segment_only() {
        let patched = seed().apply_diff(&block("x=1", "x=42"));

        assert!(patched.is_complete());
        let program = patched.program();
        assert_eq!(program.segment(0).map(str::trim), Some("x=42"));
        assert_eq!(program.segment(1), Some("\ny=2\n"));
        assert_eq!(
            program.skeleton().collect::<Vec<_>>(),
            seed().skeleton().collect::<Vec<_>>()
        );
    }

    #[test]
    fn apply_replaces_first_occurrence_within_segment() {
        let program = Program::parse(
            "dup",
            "# EVOLVE-BLOCK-START\nv=1\nv=1\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();
        let patched = apply(&program, &[DiffOperation::new("v=1", "v=2")]);
        assert_eq!(patched.program().segment(0), Some("\nv=2\nv=1\n"));
    }

    #[test]
    fn apply_prefers_lowest_segment_index() {
        let program = Program::parse(
            "twins",
            "# EVOLVE-BLOCK-START\nk=0\n# EVOLVE-BLOCK-END\n# EVOLVE-BLOCK-START\nk=0\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();
        let patched = apply(&program, &[DiffOperation::new("k=0", "k=9")]);
        assert_eq!(patched.program().segment(0), Some("\nk=9\n"));
        assert_eq!(patched.program().segment(1), Some("\nk=0\n"));
    }

    #[test]
    fn later_operations_see_earlier_results() {
        let ops = [DiffOperation::new("x=1", "x=2"), DiffOperation::new("x=2", "x=3")];
        let patched = apply(&seed(), &ops);
        assert_eq!(patched.resolved(), 2);
        assert_eq!(patched.program().segment(0).map(str::trim), Some("x=3"));
    }

    #[test]
    fn skeleton_text_is_never_searched() {
        let patched = apply(&seed(), &[DiffOperation::new("b", "B")]);
        assert_eq!(patched.misses().len(), 1);
        assert_eq!(patched.program().text(), SEED);
    }

    #[test]
    fn unresolved_operation_is_skipped_but_rest_applies() {
        let ops = [DiffOperation::new("missing", "gone"), DiffOperation::new("y=2", "y=7")];
        let patched = apply(&seed(), &ops);

        assert_eq!(
            patched.misses(),
            &[DiffApplyMiss {
                operation: 0,
                search: "missing".to_string()
            }]
        );
        assert_eq!(patched.program().segment(1).map(str::trim), Some("y=7"));
    }

    #[test]
    fn unresolved_only_renders_identically() {
        let parent = seed();
        let patched = apply(&parent, &[DiffOperation::new("nope", "never")]);
        assert_eq!(patched.program().text(), parent.text());
        assert_eq!(patched.program().hash(), parent.hash());
    }

    #[test]
    fn strict_policy_rejects_partial_application() {
        let ops = [DiffOperation::new("x=1", "x=5"), DiffOperation::new("nope", "never")];
        let result = apply(&seed(), &ops).under(ApplyPolicy::Strict);
        assert!(matches!(result, Err(DiffError::Unresolved { ref misses }) if misses.len() == 1));

        let partial = apply(&seed(), &ops).under(ApplyPolicy::Partial).unwrap();
        assert_eq!(partial.segment(0).map(str::trim), Some("x=5"));
    }

    #[test]
    fn program_without_segments_misses_everything() {
        let program = Program::parse("flat", "x=1\n").unwrap();
        let patched = apply(&program, &[DiffOperation::new("x=1", "x=2")]);
        assert_eq!(patched.misses().len(), 1);
        assert_eq!(patched.program().text(), "x=1\n");
    }

    #[test]
    fn apply_keeps_parent_origin() {
        let patched = seed().apply_diff(&block("x=1", "x=2"));
        assert_eq!(patched.program().origin(), "seed");
    }

    #[test]
    fn apply_policy_serde_lowercase() {
        let json = serde_json::to_string(&ApplyPolicy::Strict).unwrap();
        assert_eq!(json, "\"strict\"");
    }

    proptest! {
        #[test]
        fn empty_diff_is_identity(head in "[a-z\n]{0,8}", body in "[a-z=\n]{0,8}", tail in "[a-z\n]{0,8}") {
            let source = format!("{head}# EVOLVE-BLOCK-START{body}# EVOLVE-BLOCK-END{tail}");
            let program = Program::parse("prop", &source).unwrap();
            let patched = apply(&program, &[]);
            prop_assert_eq!(patched.program().text(), program.text());
            prop_assert!(patched.is_complete());
        }

        #[test]
        fn apply_is_deterministic(search in "[a-z]{1,3}", replace in "[a-z]{0,3}") {
            let ops = [DiffOperation::new(search, replace)];
            let first = apply(&seed(), &ops);
            let second = apply(&seed(), &ops);
            prop_assert_eq!(first.program(), second.program());
        }
    }
}
