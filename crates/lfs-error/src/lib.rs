#![forbid(unsafe_code)]
//! Error types for LatticeFS.
//!
//! Defines `LfsError` and a `Result<T>` alias used throughout the
//! workspace. The set is closed: every fallible public operation
//! surfaces exactly one of these kinds, and callers pattern-match on
//! the variant.

use thiserror::Error;

/// Unified error type for all LatticeFS operations.
///
/// Every error is final to the operation that returned it — no partial
/// mutation persists on the image once a variant is surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LfsError {
    #[error("not a valid filesystem image")]
    InvalidImage,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("out of range: {kind} {index} (limit {limit})")]
    OutOfRange {
        kind: &'static str,
        index: u64,
        limit: u64,
    },

    #[error("not found")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a file")]
    NotAFile,

    #[error("already exists")]
    AlreadyExists,

    #[error("no space left on image")]
    NoSpace,

    #[error("file too large")]
    FileTooLarge,

    #[error("directory full")]
    DirectoryFull,

    #[error("permission denied")]
    PermissionDenied,
}

/// Result alias using `LfsError`.
pub type Result<T> = std::result::Result<T, LfsError>;
