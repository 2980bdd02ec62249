#![forbid(unsafe_code)]
//! On-disk format parsing for the ext2/3/4 family.
//!
//! Pure parsing crate — no I/O, no side effects. Byte slices go in,
//! typed structures come out: superblocks, group descriptors, inodes,
//! extent tree nodes, and directory entry streams.

pub mod ext;

pub use ext::{
    BlockPointers, CompatFeatures, DirEntry, DirScan, Extent, ExtentHeader, ExtentIndex,
    ExtentNode, FsFlavor, GroupDescriptor, IncompatFeatures, Inode, RoCompatFeatures, ScanStop,
    Superblock, parse_extent_node, scan_dir_block,
};
