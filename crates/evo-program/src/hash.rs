//! Content hashing for program texts
//!
//! Provides [`ContentHash`], the 32-byte Blake3 digest of a program's
//! rendered text. Candidates are identified by its short form in logs and in
//! the workspace names staged for evaluation.

use std::fmt::{self, Display, Formatter};

/// A 32-byte content hash (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_compute_deterministic() {
        let h1 = ContentHash::compute(b"x=1");
        let h2 = ContentHash::compute(b"x=1");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::compute(b"x=42"));
    }

    #[test]
    fn content_hash_short_is_prefix() {
        let hash = ContentHash::compute(b"candidate");
        let short = hash.short();
        assert_eq!(short.len(), 16);
        assert_eq!(hash.to_string().len(), 64);
        assert!(hash.to_string().starts_with(&short));
    }

    #[test]
    fn short_form_is_file_name_safe() {
        let short = ContentHash::compute(b"x = 1\n").short();
        assert!(short.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
