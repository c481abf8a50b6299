//! Path tokenization.
//!
//! Paths are ASCII and slash-delimited. Empty tokens — a leading slash,
//! a trailing slash, doubled slashes — are discarded, so `"/a//b/"`
//! and `"a/b"` name the same entry. There is no `.`/`..` handling.

/// Split a path into its non-empty name tokens.
#[must_use]
pub fn tokenize(path: &str) -> Vec<&str> {
    path.split('/').filter(|token| !token.is_empty()).collect()
}
