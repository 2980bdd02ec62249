#![forbid(unsafe_code)]
//! Passive block sources.
//!
//! The interpreter core never owns I/O policy; it consumes a
//! [`ByteSource`] — positioned, read-only, whole-buffer-or-error — and
//! adapts it to whole-block reads with [`BlockSource`]. Two sources are
//! shipped: [`FileByteSource`] for disk images and raw devices, and
//! [`MemByteSource`] for in-memory images in tests and benches.
//!
//! A partition span inside a whole-disk image is expressed as a base
//! byte offset on the [`BlockSource`]; no partition-table logic exists
//! at this layer.

use rext_error::{Result, RextError};
use rext_types::{BlockNumber, BlockSize, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// A read-only, positioned byte source.
///
/// Implementations must fill the whole buffer or fail; partial reads are
/// never surfaced. Implementations are expected to be safely shareable
/// across threads (positioned reads, no shared cursor).
pub trait ByteSource: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Fill `buf` from `offset`, or fail without a partial result.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl ByteSource for Box<dyn ByteSource> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_range(offset: u64, len: usize, total: u64) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| RextError::corrupt("read range overflows u64"))?;
    if end > total {
        return Err(RextError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read past end of source: offset={offset} len={len} total={total}"),
        )));
    }
    Ok(())
}

// ── File-backed source ──────────────────────────────────────────────────────

/// Byte source over a disk image file or raw device node.
///
/// Opened read-only. On unix the reads are positioned (`pread`), so one
/// handle serves concurrent readers without cursor coordination.
#[derive(Debug, Clone)]
pub struct FileByteSource {
    file: Arc<File>,
    len: u64,
    #[cfg(not(unix))]
    cursor_lock: Arc<parking_lot::Mutex<()>>,
}

impl FileByteSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            #[cfg(not(unix))]
            cursor_lock: Arc::new(parking_lot::Mutex::new(())),
        })
    }
}

impl ByteSource for FileByteSource {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        check_range(offset, buf.len(), self.len)?;
        // No pread on this platform: serialize seek+read pairs.
        let _guard = self.cursor_lock.lock();
        let mut file = &*self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

// ── In-memory source ────────────────────────────────────────────────────────

/// Byte source over an in-memory image. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct MemByteSource {
    bytes: Arc<Vec<u8>>,
}

impl MemByteSource {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for MemByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl ByteSource for MemByteSource {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        // check_range guarantees the window fits
        let start = usize::try_from(offset)
            .map_err(|_| RextError::corrupt("offset exceeds addressable memory"))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

// ── Superblock bootstrap read ───────────────────────────────────────────────

/// Read the 1024-byte superblock region at `base + 1024`.
///
/// The one read the interpreter issues before it knows the block size.
pub fn read_superblock_region(
    source: &dyn ByteSource,
    base: u64,
) -> Result<[u8; SUPERBLOCK_SIZE]> {
    let offset = base
        .checked_add(SUPERBLOCK_OFFSET)
        .ok_or_else(|| RextError::corrupt("superblock offset overflows u64"))?;
    let mut region = [0_u8; SUPERBLOCK_SIZE];
    source.read_exact_at(offset, &mut region)?;
    Ok(region)
}

// ── Block-addressed adapter ─────────────────────────────────────────────────

/// Whole-block view over a [`ByteSource`], above a base byte offset.
///
/// Block numbers are filesystem-absolute; byte position is
/// `base + block * block_size`. Every read returns exactly one block.
pub struct BlockSource {
    source: Box<dyn ByteSource>,
    block_size: BlockSize,
    base: u64,
}

impl BlockSource {
    #[must_use]
    pub fn new(source: Box<dyn ByteSource>, block_size: BlockSize, base: u64) -> Self {
        Self {
            source,
            block_size,
            base,
        }
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn base_offset(&self) -> u64 {
        self.base
    }

    /// Blocks the span after `base` can hold (floor).
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.source.len_bytes().saturating_sub(self.base) / u64::from(self.block_size.get())
    }

    /// Read one whole block.
    pub fn read_block(&self, block: BlockNumber) -> Result<Vec<u8>> {
        let rel = block
            .byte_offset(self.block_size)
            .ok_or_else(|| RextError::corrupt(format!("block {block} offset overflows u64")))?;
        let offset = self
            .base
            .checked_add(rel.0)
            .ok_or_else(|| RextError::corrupt(format!("block {block} offset overflows u64")))?;
        trace!(block = block.0, offset, "read_block");
        let mut buf = vec![0_u8; self.block_size.as_usize()];
        self.source.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read `buf.len()` bytes at a byte offset relative to `base`.
    pub fn read_at(&self, rel_offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self
            .base
            .checked_add(rel_offset)
            .ok_or_else(|| RextError::corrupt("byte offset overflows u64"))?;
        self.source.read_exact_at(offset, buf)
    }
}

impl std::fmt::Debug for BlockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSource")
            .field("block_size", &self.block_size)
            .field("base", &self.base)
            .field("len_bytes", &self.source.len_bytes())
            .finish()
    }
}
