#![forbid(unsafe_code)]
//! Shared primitive types for the ext2/3/4 interpreter.
//!
//! Integer newtypes for the identifier spaces the on-disk format mixes
//! freely (block numbers, inode numbers, group indexes, byte offsets),
//! the constants of the layout itself (magics, well-known offsets, mode
//! and flag bits), little-endian slice readers, and the arithmetic that
//! locates an inode inside the group/table structure.
//!
//! Everything here is pure: no I/O, no allocation beyond what a caller
//! asks for, and all arithmetic is checked or explicitly saturating.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── On-disk constants ───────────────────────────────────────────────────────

/// ext2/3/4 superblock magic (`s_magic`).
pub const EXT_SUPER_MAGIC: u16 = 0xEF53;

/// The superblock always lives at this byte offset, regardless of block size.
pub const SUPERBLOCK_OFFSET: u64 = 1024;

/// Size of the superblock region read at mount time.
pub const SUPERBLOCK_SIZE: usize = 1024;

/// Smallest legal block size (`1024 << 0`).
pub const MIN_BLOCK_SIZE: u32 = 1024;

/// Largest block size this interpreter will read (`1024 << 6`).
///
/// The classic ext2 range stops at 4096; ext4 images up to 64K blocks
/// exist and parse fine, so the reader accepts them.
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// Number of direct slots in the inode block-pointer array.
pub const NDIR_BLOCKS: usize = 12;

/// Slot index of the single-indirect pointer.
pub const IND_BLOCK: usize = 12;

/// Slot index of the double-indirect pointer.
pub const DIND_BLOCK: usize = 13;

/// Slot index of the triple-indirect pointer.
pub const TIND_BLOCK: usize = 14;

/// Total slots in the inode block-pointer array.
pub const N_BLOCKS: usize = 15;

/// Byte size of the inode block-pointer area (`N_BLOCKS * 4`).
pub const BLOCK_POINTER_BYTES: usize = 60;

/// Maximum directory entry name length.
pub const NAME_MAX: usize = 255;

/// `s_rev_level` value for which the inode size is fixed at 128 bytes.
pub const GOOD_OLD_REV: u32 = 0;

/// Inode record size under revision 0.
pub const GOOD_OLD_INODE_SIZE: u16 = 128;

/// Extent tree node magic (`eh_magic`).
pub const EXTENT_MAGIC: u16 = 0xF30A;

/// Extent lengths above this encode unwritten extents.
pub const EXT_INIT_MAX_LEN: u16 = 0x8000;

/// Inode flag: block-pointer area holds an extent tree root.
pub const EXTENTS_FL: u32 = 0x0008_0000;

/// Mode mask for the file-type bits.
pub const S_IFMT: u16 = 0xF000;
/// Mode bits: socket.
pub const S_IFSOCK: u16 = 0xC000;
/// Mode bits: symbolic link.
pub const S_IFLNK: u16 = 0xA000;
/// Mode bits: regular file.
pub const S_IFREG: u16 = 0x8000;
/// Mode bits: block device.
pub const S_IFBLK: u16 = 0x6000;
/// Mode bits: directory.
pub const S_IFDIR: u16 = 0x4000;
/// Mode bits: character device.
pub const S_IFCHR: u16 = 0x2000;
/// Mode bits: FIFO.
pub const S_IFIFO: u16 = 0x1000;

/// Directory entry file-type tag for directories (`EXT2_FT_DIR`).
pub const FT_DIR: u8 = 2;

// ── Identifier newtypes ─────────────────────────────────────────────────────

/// A physical filesystem block number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Byte offset of this block's first byte for a given block size.
    ///
    /// `None` on multiplication overflow (corrupt block number).
    #[must_use]
    pub fn byte_offset(self, block_size: BlockSize) -> Option<ByteOffset> {
        self.0
            .checked_mul(u64::from(block_size.get()))
            .map(ByteOffset)
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inode number. Inode numbering starts at 1; 0 is never valid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InodeNumber(pub u64);

impl InodeNumber {
    /// The root directory inode, fixed by the format.
    pub const ROOT: Self = Self(2);

    /// Whether this number is in the valid range (≥ 1).
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 >= 1
    }

    /// Zero-based index used by the group/table location formulas.
    #[must_use]
    pub fn index0(self) -> Option<u64> {
        self.0.checked_sub(1)
    }
}

impl std::fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block group index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GroupNumber(pub u32);

impl std::fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute byte offset into the block source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    #[must_use]
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }
}

impl std::fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated filesystem block size.
///
/// Constructed from the superblock's `s_log_block_size`; always a power
/// of two in `MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Build from the on-disk log field: `1024 << s_log_block_size`.
    ///
    /// Returns `None` when the shift leaves the supported range.
    #[must_use]
    pub fn from_log(log: u32) -> Option<Self> {
        if log > 6 {
            return None;
        }
        let size = MIN_BLOCK_SIZE << log;
        (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE)
            .contains(&size)
            .then_some(Self(size))
    }

    /// The size in bytes.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// The size in bytes as `usize` (always fits: ≤ 65536).
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of u32 block pointers one block of this size holds.
    #[must_use]
    pub fn pointers_per_block(self) -> usize {
        self.as_usize() / 4
    }
}

impl std::fmt::Display for BlockSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Layout arithmetic ───────────────────────────────────────────────────────

/// Block group containing an inode: `(n − 1) / inodes_per_group`.
#[must_use]
pub fn inode_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    if inodes_per_group == 0 {
        return GroupNumber(0);
    }
    let idx = ino.index0().unwrap_or(0);
    let group = idx / u64::from(inodes_per_group);
    GroupNumber(u32::try_from(group).unwrap_or(u32::MAX))
}

/// Index of an inode within its group's table: `(n − 1) % inodes_per_group`.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    if inodes_per_group == 0 {
        return 0;
    }
    let idx = ino.index0().unwrap_or(0);
    // remainder of a u32 divisor always fits u32
    u32::try_from(idx % u64::from(inodes_per_group)).unwrap_or(0)
}

/// Number of block groups: `ceil((blocks_count − first_data_block) / blocks_per_group)`.
#[must_use]
pub fn group_count(blocks_count: u64, first_data_block: u64, blocks_per_group: u32) -> u64 {
    if blocks_per_group == 0 {
        return 0;
    }
    blocks_count
        .saturating_sub(first_data_block)
        .div_ceil(u64::from(blocks_per_group))
}

// ── Parse errors ────────────────────────────────────────────────────────────

/// Structural failures while decoding on-disk bytes.
///
/// Carried by every parser in `rext-ondisk`; the operational layer maps
/// these onto its own taxonomy at the crate boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The slice ended before the structure did.
    #[error("truncated structure: needed {needed} bytes at offset {offset}, have {have}")]
    Truncated {
        needed: usize,
        offset: usize,
        have: usize,
    },

    /// A magic field did not match its required value.
    #[error("bad magic: expected {expected:#06x}, found {found:#06x}")]
    BadMagic { expected: u64, found: u64 },

    /// A field held a value the format forbids.
    #[error("invalid {field}: {reason}")]
    BadField {
        field: &'static str,
        reason: &'static str,
    },

    /// An integer did not fit the width the computation needed.
    #[error("integer overflow computing {field}")]
    Conversion { field: &'static str },
}

// ── Little-endian slice readers ─────────────────────────────────────────────

/// Borrow `len` bytes at `offset`, or report exactly what was missing.
pub fn ensure_slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset.checked_add(len).ok_or(ParseError::Conversion {
        field: "slice bounds",
    })?;
    bytes.get(offset..end).ok_or(ParseError::Truncated {
        needed: len,
        offset,
        have: bytes.len().saturating_sub(offset),
    })
}

/// Read a little-endian u16 at `offset`.
pub fn read_le_u16(bytes: &[u8], offset: usize) -> Result<u16, ParseError> {
    let s = ensure_slice(bytes, offset, 2)?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

/// Read a little-endian u32 at `offset`.
pub fn read_le_u32(bytes: &[u8], offset: usize) -> Result<u32, ParseError> {
    let s = ensure_slice(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Read a little-endian u64 at `offset`.
pub fn read_le_u64(bytes: &[u8], offset: usize) -> Result<u64, ParseError> {
    let s = ensure_slice(bytes, offset, 8)?;
    Ok(u64::from_le_bytes([
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
    ]))
}

/// Read a fixed-size byte array at `offset`.
pub fn read_fixed<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let s = ensure_slice(bytes, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(s);
    Ok(out)
}

/// Strip trailing NUL padding from a fixed-width name field.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(bytes.len());
    &bytes[..end]
}
