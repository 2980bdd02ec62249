#![forbid(unsafe_code)]
//! Test infrastructure for the rext workspace.
//!
//! [`ImageBuilder`] assembles small ext2/3/4 images in memory, one
//! block group, with explicit control over every structure a test
//! wants to shape (or misshape). [`FlakyByteSource`] wraps an image
//! and fails reads over chosen byte ranges, for exercising the damage
//! tolerance paths end to end.

use rext::{ByteSource, MemByteSource, Result, RextError};
use rext_types::{
    EXT_SUPER_MAGIC, EXTENT_MAGIC, EXTENTS_FL, S_IFDIR, S_IFLNK, S_IFREG,
};
use std::io;
use std::ops::Range;

/// Directory entry type tag for regular files.
pub const FT_REG: u8 = 1;
/// Directory entry type tag for directories.
pub const FT_DIR: u8 = 2;
/// Directory entry type tag for symlinks.
pub const FT_SYMLINK: u8 = 7;

// ── Image builder ───────────────────────────────────────────────────────────

/// Builds a single-group ext image in memory.
///
/// Fixed layout: superblock at byte 1024, group descriptor table in
/// the block after the first data block, bitmaps next, then an inode
/// table sized for `inodes_count` 128-byte records. Data blocks are
/// handed out by [`ImageBuilder::alloc_block`] from just past the
/// table. Construction panics on misuse; this is test scaffolding,
/// not a production writer.
pub struct ImageBuilder {
    image: Vec<u8>,
    block_size: usize,
    first_data_block: u64,
    inode_table_block: u64,
    inode_size: usize,
    inodes_count: u32,
    next_free: u64,
}

impl ImageBuilder {
    /// A fresh image of `total_blocks` blocks of `block_size` bytes.
    ///
    /// `block_size` must be a power of two between 1024 and 65536.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // builder geometry stays tiny
    pub fn new(block_size: usize, total_blocks: u64) -> Self {
        assert!(block_size.is_power_of_two() && (1024..=65536).contains(&block_size));
        let inodes_count = 32_u32;
        let inode_size = 128_usize;
        let first_data_block = u64::from(block_size == 1024);

        let mut image = vec![0_u8; block_size * total_blocks as usize];
        let sb = 1024;
        image[sb + 0x38..sb + 0x3A].copy_from_slice(&EXT_SUPER_MAGIC.to_le_bytes());
        image[sb..sb + 4].copy_from_slice(&inodes_count.to_le_bytes());
        image[sb + 0x04..sb + 0x08].copy_from_slice(&(total_blocks as u32).to_le_bytes());
        image[sb + 0x14..sb + 0x18].copy_from_slice(&(first_data_block as u32).to_le_bytes());
        let log = (block_size / 1024).trailing_zeros();
        image[sb + 0x18..sb + 0x1C].copy_from_slice(&log.to_le_bytes());
        image[sb + 0x20..sb + 0x24].copy_from_slice(&(total_blocks as u32).to_le_bytes());
        image[sb + 0x28..sb + 0x2C].copy_from_slice(&inodes_count.to_le_bytes());
        image[sb + 0x4C..sb + 0x50].copy_from_slice(&1_u32.to_le_bytes());
        image[sb + 0x58..sb + 0x5A].copy_from_slice(&(inode_size as u16).to_le_bytes());

        let gdt_block = first_data_block + 1;
        let block_bitmap = first_data_block + 2;
        let inode_bitmap = first_data_block + 3;
        let inode_table_block = first_data_block + 4;
        let gd = gdt_block as usize * block_size;
        image[gd..gd + 4].copy_from_slice(&(block_bitmap as u32).to_le_bytes());
        image[gd + 4..gd + 8].copy_from_slice(&(inode_bitmap as u32).to_le_bytes());
        image[gd + 8..gd + 12].copy_from_slice(&(inode_table_block as u32).to_le_bytes());

        let table_bytes = inodes_count as usize * inode_size;
        let table_blocks = table_bytes.div_ceil(block_size) as u64;

        Self {
            image,
            block_size,
            first_data_block,
            inode_table_block,
            inode_size,
            inodes_count,
            next_free: inode_table_block + table_blocks,
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn first_data_block(&self) -> u64 {
        self.first_data_block
    }

    /// Hand out the next unused data block.
    pub fn alloc_block(&mut self) -> u64 {
        let block = self.next_free;
        self.next_free += 1;
        assert!(
            (block as usize + 1) * self.block_size <= self.image.len(),
            "image too small for allocation"
        );
        block
    }

    // ── Superblock knobs ────────────────────────────────────────────

    pub fn volume_name(&mut self, name: &str) -> &mut Self {
        assert!(name.len() <= 16);
        let off = 1024 + 0x78;
        self.image[off..off + 16].fill(0);
        self.image[off..off + name.len()].copy_from_slice(name.as_bytes());
        self
    }

    pub fn uuid(&mut self, uuid: [u8; 16]) -> &mut Self {
        let off = 1024 + 0x68;
        self.image[off..off + 16].copy_from_slice(&uuid);
        self
    }

    pub fn compat(&mut self, bits: u32) -> &mut Self {
        self.or_u32(1024 + 0x5C, bits);
        self
    }

    pub fn incompat(&mut self, bits: u32) -> &mut Self {
        self.or_u32(1024 + 0x60, bits);
        self
    }

    pub fn ro_compat(&mut self, bits: u32) -> &mut Self {
        self.or_u32(1024 + 0x64, bits);
        self
    }

    /// Turn on the 64-bit feature with the given descriptor size.
    pub fn enable_64bit(&mut self, desc_size: u16) -> &mut Self {
        self.incompat(0x80);
        let off = 1024 + 0xFE;
        self.image[off..off + 2].copy_from_slice(&desc_size.to_le_bytes());
        self
    }

    fn or_u32(&mut self, offset: usize, bits: u32) {
        let mut word = [0_u8; 4];
        word.copy_from_slice(&self.image[offset..offset + 4]);
        let value = u32::from_le_bytes(word) | bits;
        self.image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ── Inodes ──────────────────────────────────────────────────────

    fn inode_offset(&self, ino: u32) -> usize {
        assert!(ino >= 1 && ino <= self.inodes_count, "inode out of range");
        self.inode_table_block as usize * self.block_size + (ino as usize - 1) * self.inode_size
    }

    /// Write an inode's base record; block pointers start zeroed.
    #[allow(clippy::cast_possible_truncation)] // builder sizes stay tiny
    pub fn inode(&mut self, ino: u32, mode: u16, size: u64) -> &mut Self {
        let off = self.inode_offset(ino);
        self.image[off..off + self.inode_size].fill(0);
        self.image[off..off + 2].copy_from_slice(&mode.to_le_bytes());
        self.image[off + 0x04..off + 0x08]
            .copy_from_slice(&((size & 0xFFFF_FFFF) as u32).to_le_bytes());
        self.image[off + 0x6C..off + 0x70].copy_from_slice(&((size >> 32) as u32).to_le_bytes());
        self.image[off + 0x10..off + 0x14].copy_from_slice(&1_700_000_000_u32.to_le_bytes());
        self.image[off + 0x1A..off + 0x1C].copy_from_slice(&1_u16.to_le_bytes());
        self
    }

    /// Point one of an inode's fifteen block slots at a block.
    pub fn block_slot(&mut self, ino: u32, slot: usize, block: u32) -> &mut Self {
        assert!(slot < 15);
        let off = self.inode_offset(ino) + 0x28 + slot * 4;
        self.image[off..off + 4].copy_from_slice(&block.to_le_bytes());
        self
    }

    /// Set the extents flag without touching the block area.
    pub fn set_extents_flag(&mut self, ino: u32) -> &mut Self {
        let off = self.inode_offset(ino) + 0x20;
        self.or_u32(off, EXTENTS_FL);
        self
    }

    /// A regular file over direct blocks; returns the blocks used.
    pub fn file_direct(&mut self, ino: u32, content: &[u8]) -> Vec<u64> {
        let blocks_needed = content.len().div_ceil(self.block_size).max(1);
        assert!(blocks_needed <= 12, "file_direct only covers direct slots");
        self.inode(ino, S_IFREG | 0o644, content.len() as u64);

        let mut used = Vec::new();
        for (i, chunk) in content.chunks(self.block_size).enumerate() {
            let block = self.alloc_block();
            self.write_block_at(block, 0, chunk);
            #[allow(clippy::cast_possible_truncation)] // single-group images
            self.block_slot(ino, i, block as u32);
            used.push(block);
        }
        used
    }

    /// A directory of one block: `.` and `..` first, then `entries` as
    /// (name, inode, type tag), the last record padded to the block end.
    pub fn dir(&mut self, ino: u32, parent: u32, entries: &[(&[u8], u32, u8)]) -> u64 {
        self.inode(ino, S_IFDIR | 0o755, self.block_size as u64);
        let off = self.inode_offset(ino) + 0x1A;
        self.image[off..off + 2].copy_from_slice(&2_u16.to_le_bytes());

        let block = self.alloc_block();
        #[allow(clippy::cast_possible_truncation)] // single-group images
        self.block_slot(ino, 0, block as u32);

        let mut records: Vec<(u32, u8, Vec<u8>)> =
            vec![(ino, FT_DIR, b".".to_vec()), (parent, FT_DIR, b"..".to_vec())];
        records.extend(entries.iter().map(|&(name, e, ft)| (e, ft, name.to_vec())));

        let base = block as usize * self.block_size;
        let mut cursor = 0_usize;
        for (i, (entry_ino, ft, name)) in records.iter().enumerate() {
            let aligned = (8 + name.len() + 3) & !3;
            let rec_len = if i + 1 == records.len() {
                self.block_size - cursor
            } else {
                aligned
            };
            assert!(cursor + rec_len <= self.block_size, "directory block overflow");
            let p = base + cursor;
            self.image[p..p + 4].copy_from_slice(&entry_ino.to_le_bytes());
            self.image[p + 4..p + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
            self.image[p + 6] = name.len() as u8;
            self.image[p + 7] = *ft;
            self.image[p + 8..p + 8 + name.len()].copy_from_slice(name);
            cursor += rec_len;
        }
        block
    }

    /// A symlink: inline when the target fits the block area, one data
    /// block otherwise.
    pub fn symlink(&mut self, ino: u32, target: &[u8]) {
        self.inode(ino, S_IFLNK | 0o777, target.len() as u64);
        if target.len() < 60 {
            let off = self.inode_offset(ino) + 0x28;
            self.image[off..off + target.len()].copy_from_slice(target);
        } else {
            assert!(target.len() <= self.block_size);
            let block = self.alloc_block();
            self.write_block_at(block, 0, target);
            #[allow(clippy::cast_possible_truncation)] // single-group images
            self.block_slot(ino, 0, block as u32);
        }
    }

    // ── Extent trees ────────────────────────────────────────────────

    /// Extent root in the inode, depth 0, entries as
    /// (logical, length, physical).
    pub fn extent_leaf_root(&mut self, ino: u32, extents: &[(u32, u16, u64)]) -> &mut Self {
        assert!(extents.len() <= 4, "inode root holds at most 4 entries");
        self.set_extents_flag(ino);
        let off = self.inode_offset(ino) + 0x28;
        write_extent_node(&mut self.image[off..off + 60], 0, 4);
        for (i, &e) in extents.iter().enumerate() {
            write_leaf_entry(&mut self.image[off + 12 + i * 12..off + 24 + i * 12], e);
        }
        self.set_entry_count(off, extents.len() as u16);
        self
    }

    /// Extent root in the inode, depth `depth`, children as
    /// (first logical, child block).
    pub fn extent_index_root(
        &mut self,
        ino: u32,
        depth: u16,
        children: &[(u32, u64)],
    ) -> &mut Self {
        assert!(children.len() <= 4, "inode root holds at most 4 entries");
        self.set_extents_flag(ino);
        let off = self.inode_offset(ino) + 0x28;
        write_extent_node(&mut self.image[off..off + 60], depth, 4);
        for (i, &c) in children.iter().enumerate() {
            write_index_entry(&mut self.image[off + 12 + i * 12..off + 24 + i * 12], c);
        }
        self.set_entry_count(off, children.len() as u16);
        self
    }

    /// A depth-0 extent node filling a whole block.
    #[allow(clippy::cast_possible_truncation)] // max_entries bounded by block size
    pub fn extent_leaf_block(&mut self, block: u64, extents: &[(u32, u16, u64)]) {
        let max = ((self.block_size - 12) / 12) as u16;
        assert!(extents.len() <= usize::from(max));
        let base = block as usize * self.block_size;
        write_extent_node(&mut self.image[base..base + self.block_size], 0, max);
        for (i, &e) in extents.iter().enumerate() {
            write_leaf_entry(&mut self.image[base + 12 + i * 12..base + 24 + i * 12], e);
        }
        self.set_entry_count(base, extents.len() as u16);
    }

    /// An index node filling a whole block, children one level down.
    #[allow(clippy::cast_possible_truncation)] // max_entries bounded by block size
    pub fn extent_index_block(&mut self, block: u64, depth: u16, children: &[(u32, u64)]) {
        let max = ((self.block_size - 12) / 12) as u16;
        assert!(children.len() <= usize::from(max));
        let base = block as usize * self.block_size;
        write_extent_node(&mut self.image[base..base + self.block_size], depth, max);
        for (i, &c) in children.iter().enumerate() {
            write_index_entry(&mut self.image[base + 12 + i * 12..base + 24 + i * 12], c);
        }
        self.set_entry_count(base, children.len() as u16);
    }

    fn set_entry_count(&mut self, node_offset: usize, count: u16) {
        self.image[node_offset + 2..node_offset + 4].copy_from_slice(&count.to_le_bytes());
    }

    // ── Indirect chains and raw access ──────────────────────────────

    /// A block of little-endian u32 pointers, the rest zero.
    pub fn indirect_block(&mut self, block: u64, pointers: &[u32]) {
        assert!(pointers.len() * 4 <= self.block_size);
        let base = block as usize * self.block_size;
        self.image[base..base + self.block_size].fill(0);
        for (i, &p) in pointers.iter().enumerate() {
            self.image[base + i * 4..base + i * 4 + 4].copy_from_slice(&p.to_le_bytes());
        }
    }

    /// Write raw bytes into a block at a byte offset within it.
    pub fn write_block_at(&mut self, block: u64, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.block_size);
        let base = block as usize * self.block_size + offset;
        self.image[base..base + bytes.len()].copy_from_slice(bytes);
    }

    /// Write raw bytes at an absolute image offset.
    pub fn poke(&mut self, offset: usize, bytes: &[u8]) {
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.image
    }

    #[must_use]
    pub fn into_source(self) -> MemByteSource {
        MemByteSource::new(self.image)
    }
}

fn write_extent_node(node: &mut [u8], depth: u16, max_entries: u16) {
    node[..12].fill(0);
    node[0..2].copy_from_slice(&EXTENT_MAGIC.to_le_bytes());
    node[4..6].copy_from_slice(&max_entries.to_le_bytes());
    node[6..8].copy_from_slice(&depth.to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)] // physical split into lo and hi halves
fn write_leaf_entry(entry: &mut [u8], (logical, len, physical): (u32, u16, u64)) {
    entry[0..4].copy_from_slice(&logical.to_le_bytes());
    entry[4..6].copy_from_slice(&len.to_le_bytes());
    entry[6..8].copy_from_slice(&(((physical >> 32) & 0xFFFF) as u16).to_le_bytes());
    entry[8..12].copy_from_slice(&((physical & 0xFFFF_FFFF) as u32).to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)] // child split into lo and hi halves
fn write_index_entry(entry: &mut [u8], (logical, child): (u32, u64)) {
    entry[0..4].copy_from_slice(&logical.to_le_bytes());
    entry[4..8].copy_from_slice(&((child & 0xFFFF_FFFF) as u32).to_le_bytes());
    entry[8..10].copy_from_slice(&(((child >> 32) & 0xFFFF) as u16).to_le_bytes());
}

// ── Fault injection ─────────────────────────────────────────────────────────

/// An in-memory byte source that fails reads over poisoned ranges.
pub struct FlakyByteSource {
    data: Vec<u8>,
    poisoned: Vec<Range<u64>>,
}

impl FlakyByteSource {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            poisoned: Vec::new(),
        }
    }

    /// Fail any read overlapping this byte range.
    pub fn poison(&mut self, range: Range<u64>) {
        self.poisoned.push(range);
    }

    /// Fail any read touching one whole block.
    pub fn poison_block(&mut self, block_size: u64, block: u64) {
        self.poison(block * block_size..(block + 1) * block_size);
    }
}

impl ByteSource for FlakyByteSource {
    fn len_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if self.poisoned.iter().any(|r| r.start < end && offset < r.end) {
            return Err(RextError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected read fault",
            )));
        }
        let start = usize::try_from(offset).map_err(|_| {
            RextError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "offset past end of source",
            ))
        })?;
        let slice = self.data.get(start..start + buf.len()).ok_or_else(|| {
            RextError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of source",
            ))
        })?;
        buf.copy_from_slice(slice);
        Ok(())
    }
}
