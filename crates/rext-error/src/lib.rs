#![forbid(unsafe_code)]
//! Operational error taxonomy for the ext2/3/4 interpreter.
//!
//! Structural decode problems live in [`rext_types::ParseError`]; this
//! crate owns the errors operations return to callers. The split keeps
//! parsers free of policy: a parser only knows a field was bad, while
//! the operation layer knows whether that means "not an ext volume",
//! "corrupt layout", or "malformed extent tree".
//!
//! | variant | raised by | recovery |
//! |---------|-----------|----------|
//! | `NotAFilesystem` | mount, on bad superblock magic | none — wrong image |
//! | `Io` | any block-source read | caller retries or gives up |
//! | `InvalidInode` | `read_inode` with number < 1 or past the table | caller bug |
//! | `CorruptLayout` | arithmetic landing outside the volume | partial reads may still work |
//! | `MalformedExtentTree` | extent header/depth discipline violations | siblings still resolve |
//! | `NotDirectory` | path walk through a non-directory | caller checks type |
//! | `NotFound` | path walk, missing component | caller checks path |
//! | `Unsupported` | structures this reader does not interpret | none |
//!
//! Directory listing and file materialization prefer local recovery
//! (skip a block, zero-fill a hole) over raising; mount is the one
//! operation that must fail cleanly with no partial handle.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RextError>;

/// Errors surfaced by volume operations.
#[derive(Debug, Error)]
pub enum RextError {
    /// The superblock magic did not match; the image is not ext2/3/4.
    #[error("not an ext2/3/4 filesystem (bad superblock magic)")]
    NotAFilesystem,

    /// The block source failed to produce bytes.
    #[error("block source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller asked for an inode number outside the valid range.
    #[error("invalid inode number {0}")]
    InvalidInode(u64),

    /// On-disk geometry implies an out-of-range group, block, or offset.
    #[error("corrupt filesystem layout: {detail}")]
    CorruptLayout { detail: String },

    /// An extent tree node violated the format's structural rules.
    #[error("malformed extent tree: {detail}")]
    MalformedExtentTree { detail: String },

    /// A path component was walked through something that is not a directory.
    #[error("inode {0} is not a directory")]
    NotDirectory(u64),

    /// A path component does not exist.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// A structure this reader recognizes but does not interpret.
    #[error("unsupported structure: {detail}")]
    Unsupported { detail: String },
}

impl RextError {
    /// Shorthand for [`RextError::CorruptLayout`].
    #[must_use]
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::CorruptLayout {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`RextError::MalformedExtentTree`].
    #[must_use]
    pub fn bad_extent(detail: impl Into<String>) -> Self {
        Self::MalformedExtentTree {
            detail: detail.into(),
        }
    }

    /// Whether this error leaves sibling structures readable.
    ///
    /// Per-subtree failures (extent subtrees, search subtrees rooted at
    /// a damaged entry) are recoverable; mount-level failures are not.
    #[must_use]
    pub fn is_subtree_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::InvalidInode(_)
                | Self::CorruptLayout { .. }
                | Self::MalformedExtentTree { .. }
        )
    }
}
