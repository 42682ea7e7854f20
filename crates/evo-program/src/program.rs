//! Marked program representation
//!
//! A [`Program`] is a source text split into a fixed skeleton and an ordered
//! list of evolve segments. Segments are the regions between
//! [`EVOLVE_BLOCK_START`] and [`EVOLVE_BLOCK_END`]; everything else is
//! skeleton and is never touched by a diff.
//!
//! # Invariants
//! - `skeleton.len() == segments.len() + 1`
//! - `render(parse(text)) == text` for any text with balanced, non-nested markers

use crate::hash::ContentHash;
use im::Vector;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Literal marker opening an evolve segment
pub const EVOLVE_BLOCK_START: &str = "# EVOLVE-BLOCK-START";

/// Literal marker closing an evolve segment
pub const EVOLVE_BLOCK_END: &str = "# EVOLVE-BLOCK-END";

/// Immutable program split into skeleton fragments and evolve segments
///
/// Fragments are shared between a parent and the candidates derived from it;
/// cloning a `Program` never copies fragment text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// File path or synthetic label
    origin: String,
    /// Full rendered text
    text: Arc<str>,
    /// Skeleton fragments `S[0..=k]`
    skeleton: Vector<Arc<str>>,
    /// Evolve segments `E[0..k]`
    segments: Vector<Arc<str>>,
    /// Blake3 of `text`
    hash: ContentHash,
}

impl Program {
    /// Parse source text into skeleton and evolve segments
    ///
    /// # Errors
    /// Returns [`ProgramError::MarkerMismatch`] if an end marker appears
    /// before any start marker, or if a start marker is not followed by
    /// exactly one end marker before the next start marker.
    pub fn parse(origin: impl Into<String>, source: &str) -> Result<Self, ProgramError> {
        let origin = origin.into();
        let mut pieces = source.split(EVOLVE_BLOCK_START);

        let head = pieces.next().unwrap_or_default();
        if head.contains(EVOLVE_BLOCK_END) {
            return Err(ProgramError::MarkerMismatch {
                origin,
                detail: "end marker without a preceding start marker".to_string(),
            });
        }

        let mut skeleton = Vector::new();
        let mut segments = Vector::new();
        skeleton.push_back(Arc::from(head));

        for (index, piece) in pieces.enumerate() {
            let mut parts = piece.split(EVOLVE_BLOCK_END);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(segment), Some(rest), None) => {
                    segments.push_back(Arc::from(segment));
                    skeleton.push_back(Arc::from(rest));
                }
                _ => {
                    return Err(ProgramError::MarkerMismatch {
                        origin,
                        detail: format!(
                            "evolve block {index} is followed by {} end markers, expected 1",
                            piece.matches(EVOLVE_BLOCK_END).count()
                        ),
                    });
                }
            }
        }

        Ok(Self::assemble(origin, skeleton, segments))
    }

    /// Read and parse a program file; the path becomes the origin
    ///
    /// # Errors
    /// Returns [`ProgramError::Io`] if the file cannot be read, or
    /// [`ProgramError::MarkerMismatch`] if its markers are malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProgramError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path.display().to_string(), &source)
    }

    /// Build a program sharing this one's skeleton with new segments
    ///
    /// The caller guarantees `segments.len() == self.segment_count()`.
    pub(crate) fn with_segments(&self, segments: Vector<Arc<str>>) -> Self {
        debug_assert_eq!(segments.len(), self.segments.len());
        Self::assemble(self.origin.clone(), self.skeleton.clone(), segments)
    }

    fn assemble(origin: String, skeleton: Vector<Arc<str>>, segments: Vector<Arc<str>>) -> Self {
        let text: Arc<str> = Arc::from(render(&skeleton, &segments));
        let hash = ContentHash::compute(text.as_bytes());
        Self {
            origin,
            text,
            skeleton,
            segments,
            hash,
        }
    }

    /// Relabel the program (e.g. `generation-3`)
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// File path or synthetic label
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Full rendered text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Content hash of the rendered text
    #[inline]
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Number of evolve segments
    #[inline]
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Evolve segment at `index`
    #[inline]
    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(AsRef::as_ref)
    }

    /// Evolve segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().map(AsRef::as_ref)
    }

    /// Skeleton fragments in order
    pub fn skeleton(&self) -> impl Iterator<Item = &str> + '_ {
        self.skeleton.iter().map(AsRef::as_ref)
    }

    pub(crate) fn segment_vector(&self) -> &Vector<Arc<str>> {
        &self.segments
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Interleave skeleton fragments and segments with the literal markers
fn render(skeleton: &Vector<Arc<str>>, segments: &Vector<Arc<str>>) -> String {
    let capacity = skeleton.iter().chain(segments.iter()).map(|s| s.len()).sum::<usize>()
        + segments.len() * (EVOLVE_BLOCK_START.len() + EVOLVE_BLOCK_END.len());
    let mut out = String::with_capacity(capacity);

    let mut fragments = skeleton.iter();
    if let Some(first) = fragments.next() {
        out.push_str(first);
    }
    for (segment, fragment) in segments.iter().zip(fragments) {
        out.push_str(EVOLVE_BLOCK_START);
        out.push_str(segment);
        out.push_str(EVOLVE_BLOCK_END);
        out.push_str(fragment);
    }
    out
}

/// Errors raised while building a [`Program`]
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    /// Unbalanced or nested evolve markers
    #[error("mismatched EVOLVE-BLOCK markers in {origin}: {detail}")]
    MarkerMismatch { origin: String, detail: String },

    /// Program file could not be read
    #[error("failed to read program {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const TWO_BLOCKS: &str = "a\n# EVOLVE-BLOCK-START\nx=1\n# EVOLVE-BLOCK-END\nb\n# EVOLVE-BLOCK-START\ny=2\n# EVOLVE-BLOCK-END\nc";

    #[test]
    fn parse_splits_skeleton_and_segments() {
        let program = Program::parse("seed", TWO_BLOCKS).unwrap();

        assert_eq!(program.segment_count(), 2);
        assert_eq!(program.segments().collect::<Vec<_>>(), vec!["\nx=1\n", "\ny=2\n"]);
        assert_eq!(program.skeleton().collect::<Vec<_>>(), vec!["a\n", "\nb\n", "\nc"]);
        assert_eq!(program.text(), TWO_BLOCKS);
        assert_eq!(program.origin(), "seed");
    }

    #[test]
    fn parse_without_markers_is_all_skeleton() {
        let program = Program::parse("plain", "print('hi')\n").unwrap();
        assert_eq!(program.segment_count(), 0);
        assert_eq!(program.skeleton().count(), 1);
        assert_eq!(program.to_string(), "print('hi')\n");
    }

    #[test]
    fn parse_allows_empty_outer_skeleton() {
        let source = "# EVOLVE-BLOCK-START\nbody\n# EVOLVE-BLOCK-END";
        let program = Program::parse("edge", source).unwrap();
        assert_eq!(program.skeleton().collect::<Vec<_>>(), vec!["", ""]);
        assert_eq!(program.segment(0), Some("\nbody\n"));
        assert_eq!(program.text(), source);
    }

    #[test]
    fn end_marker_without_start_is_rejected() {
        let result = Program::parse("bad", "a\n# EVOLVE-BLOCK-END\nb");
        assert!(matches!(result, Err(ProgramError::MarkerMismatch { .. })));
    }

    #[test]
    fn start_marker_without_end_is_rejected() {
        let result = Program::parse("bad", "a\n# EVOLVE-BLOCK-START\nx=1\n");
        assert!(matches!(result, Err(ProgramError::MarkerMismatch { .. })));
    }

    #[test]
    fn nested_markers_are_rejected() {
        let source = "# EVOLVE-BLOCK-START\n# EVOLVE-BLOCK-START\nx\n# EVOLVE-BLOCK-END\n# EVOLVE-BLOCK-END\n";
        let result = Program::parse("nested", source);
        assert!(matches!(result, Err(ProgramError::MarkerMismatch { .. })));
    }

    #[test]
    fn mismatch_error_names_origin() {
        let err = Program::parse("seed.py", "# EVOLVE-BLOCK-END").unwrap_err();
        assert!(err.to_string().contains("seed.py"));
    }

    #[test]
    fn hash_tracks_rendered_text() {
        let a = Program::parse("a", TWO_BLOCKS).unwrap();
        let b = Program::parse("b", TWO_BLOCKS).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(*a.hash(), ContentHash::compute(TWO_BLOCKS.as_bytes()));
    }

    #[test]
    fn with_origin_keeps_content() {
        let program = Program::parse("seed", TWO_BLOCKS).unwrap();
        let relabelled = program.clone().with_origin("generation-1");
        assert_eq!(relabelled.origin(), "generation-1");
        assert_eq!(relabelled.text(), program.text());
    }

    #[test]
    fn load_reads_file_and_uses_path_as_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.py");
        std::fs::write(&path, TWO_BLOCKS).unwrap();

        let program = Program::load(&path).unwrap();
        assert_eq!(program.origin(), path.display().to_string());
        assert_eq!(program.segment_count(), 2);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = Program::load("/nonexistent/seed.py");
        assert!(matches!(result, Err(ProgramError::Io { .. })));
    }

    fn balanced_source() -> impl Strategy<Value = String> {
        // Fragments never contain a marker since '#' is excluded.
        let fragment = "[a-z0-9 =\n]{0,12}";
        proptest::collection::vec((fragment, fragment), 0..5).prop_flat_map(move |blocks| {
            fragment.prop_map(move |head| {
                let mut text = head;
                for (segment, tail) in &blocks {
                    text.push_str(EVOLVE_BLOCK_START);
                    text.push_str(segment);
                    text.push_str(EVOLVE_BLOCK_END);
                    text.push_str(tail);
                }
                text
            })
        })
    }

    proptest! {
        #[test]
        fn render_inverts_parse(source in balanced_source()) {
            let program = Program::parse("prop", &source).unwrap();
            prop_assert_eq!(program.text(), source.as_str());
            prop_assert_eq!(program.skeleton().count(), program.segment_count() + 1);
        }
    }
}
