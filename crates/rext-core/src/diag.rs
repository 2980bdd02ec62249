//! Structured diagnostics for tolerated damage.
//!
//! Read operations prefer local recovery over failing: a damaged
//! directory record stops one block's scan, an unreadable data block
//! zero-fills, a corrupt extent subtree is dropped while its siblings
//! resolve. Each such decision emits a [`DiagnosticEvent`] to the
//! volume's sink so callers can audit what was skipped. The default
//! sink discards events; [`CollectingSink`] buffers them.

use rext_ondisk::ScanStop;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// One tolerated-damage decision made during a read operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// A directory block's entry scan ended at a damaged record.
    DirScanStopped { dir: u64, block: u64, stop: ScanStop },
    /// A directory data block could not be read; its entries are lost.
    DirBlockUnreadable { dir: u64, block: u64, detail: String },
    /// A listing entry was dropped because its inode could not be read.
    EntryDropped {
        dir: u64,
        child: u64,
        name: String,
        detail: String,
    },
    /// An indirect pointer block could not be read; its span became holes.
    IndirectUnreadable {
        block: u64,
        level: u8,
        detail: String,
    },
    /// An extent child node was skipped; sibling subtrees still resolved.
    ExtentSubtreeSkipped { child_block: u64, detail: String },
    /// Part of a block mapping was discarded (overlap or beyond-size run).
    MappingTruncated { kept: u64, detail: String },
    /// A mapped data block failed to read and was served as zeros.
    ZeroFilledBlock { block: u64, detail: String },
    /// A search subtree failed and was skipped; siblings were kept.
    SearchSubtreeSkipped {
        dir: u64,
        path: String,
        detail: String,
    },
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirScanStopped { dir, block, stop } => {
                write!(f, "directory {dir}: scan of block {block} stopped: {stop:?}")
            }
            Self::DirBlockUnreadable { dir, block, detail } => {
                write!(f, "directory {dir}: block {block} unreadable: {detail}")
            }
            Self::EntryDropped {
                dir,
                child,
                name,
                detail,
            } => {
                write!(
                    f,
                    "directory {dir}: dropped entry {name:?} (inode {child}): {detail}"
                )
            }
            Self::IndirectUnreadable {
                block,
                level,
                detail,
            } => {
                write!(
                    f,
                    "level-{level} indirect block {block} unreadable, span treated as holes: {detail}"
                )
            }
            Self::ExtentSubtreeSkipped {
                child_block,
                detail,
            } => {
                write!(f, "extent subtree at block {child_block} skipped: {detail}")
            }
            Self::MappingTruncated { kept, detail } => {
                write!(f, "block mapping truncated after {kept} blocks: {detail}")
            }
            Self::ZeroFilledBlock { block, detail } => {
                write!(f, "block {block} unreadable, served as zeros: {detail}")
            }
            Self::SearchSubtreeSkipped { dir, path, detail } => {
                write!(f, "search skipped subtree {path:?} (inode {dir}): {detail}")
            }
        }
    }
}

/// Receiver for [`DiagnosticEvent`]s.
///
/// Implementations must not fail and must not block for long; events
/// are emitted from inside read paths.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Discards every event. The sink a volume starts with.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record(&self, _event: DiagnosticEvent) {}
}

/// Buffers events for later inspection. Clones share one buffer, so a
/// caller can keep a handle while the volume owns the sink.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<parking_lot::Mutex<Vec<DiagnosticEvent>>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}
