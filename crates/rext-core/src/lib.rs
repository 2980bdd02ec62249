#![forbid(unsafe_code)]
//! Read-only interpretation of ext2/3/4 volumes.
//!
//! [`Volume`] mounts a byte source, then serves inode reads, block
//! mapping, directory listing, file materialization, path resolution,
//! and recursive name search. Damage encountered mid-operation is
//! tolerated wherever a local recovery exists (skip the block,
//! zero-fill the hole, stop the scan) and reported through the
//! volume's [`diag::DiagnosticSink`].
//!
//! ```no_run
//! use rext_core::{InodeNumber, Volume};
//!
//! # fn main() -> rext_core::Result<()> {
//! let volume = Volume::mount_path("disk.img")?;
//! for entry in volume.list_directory(InodeNumber::ROOT)? {
//!     println!("{:>8} {}", entry.size, entry.name_str());
//! }
//! # Ok(())
//! # }
//! ```

pub mod diag;

pub use diag::{CollectingSink, DiagnosticEvent, DiagnosticSink, NullSink};
pub use rext_block::{BlockSource, ByteSource, FileByteSource, MemByteSource};
pub use rext_error::{Result, RextError};
pub use rext_ondisk::{
    BlockPointers, CompatFeatures, FsFlavor, GroupDescriptor, IncompatFeatures, Inode,
    RoCompatFeatures, ScanStop, Superblock,
};
pub use rext_types::{BlockNumber, BlockSize, InodeNumber};

use rext_block::read_superblock_region;
use rext_ondisk::{DirEntry as RawDirEntry, ExtentNode, parse_extent_node, scan_dir_block};
use rext_types::{DIND_BLOCK, IND_BLOCK, NDIR_BLOCKS, N_BLOCKS, ParseError, TIND_BLOCK};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

// ── Mount options ───────────────────────────────────────────────────────────

/// Options controlling how a volume is mounted.
#[derive(Debug, Clone, Default)]
pub struct VolumeOptions {
    /// Byte offset of the filesystem's first byte within the source.
    ///
    /// Nonzero when the volume is a partition span inside a whole-disk
    /// image; no partition table is ever consulted.
    pub base_offset: u64,

    /// Skip the post-parse geometry cross-checks.
    ///
    /// The magic check still applies. Intended for salvage work on
    /// volumes whose superblock geometry is known to be damaged.
    pub skip_geometry_checks: bool,
}

// ── Block references ────────────────────────────────────────────────────────

/// One logical block's physical backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockRef {
    /// Backed by a physical block.
    Mapped(BlockNumber),
    /// Sparse: no backing, reads as zeros.
    Hole,
}

impl BlockRef {
    #[must_use]
    pub fn is_hole(self) -> bool {
        matches!(self, Self::Hole)
    }
}

/// A contiguous logical-to-physical run gathered from an extent tree.
#[derive(Debug, Clone, Copy)]
struct ExtentRun {
    logical: u32,
    physical: u64,
    len: u16,
}

// ── Directory listing projection ────────────────────────────────────────────

/// One name in a directory, joined with its inode's metadata.
///
/// Plain owned data with no tie to the volume it came from. The name is
/// kept as raw on-disk bytes; [`FileEntry::name_str`] is the documented
/// lossy UTF-8 decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub inode: InodeNumber,
    pub name: Vec<u8>,
    /// From the directory entry's file-type tag.
    pub is_directory: bool,
    pub size: u64,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u32,
    /// Full slash-separated path. Populated by [`Volume::search_files`];
    /// `None` in plain listings.
    pub full_path: Option<String>,
}

impl FileEntry {
    /// Lossy UTF-8 rendering of the raw name bytes.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Modification time as a [`SystemTime`].
    #[must_use]
    pub fn modified_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.mtime))
    }
}

// ── Volume ──────────────────────────────────────────────────────────────────

/// A mounted ext2/3/4 volume.
///
/// Owns the superblock and the group descriptor table for its lifetime;
/// every operation returns plain owned data. All reads go through
/// positioned block reads, so a volume over a thread-safe source can
/// serve concurrent read-only callers.
pub struct Volume {
    blocks: BlockSource,
    sb: Superblock,
    groups: Vec<GroupDescriptor>,
    sink: Box<dyn DiagnosticSink>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("flavor", &self.sb.flavor())
            .field("block_size", &self.sb.block_size)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Extent tree depth cap, matching the kernel's limit.
    const MAX_EXTENT_DEPTH: u16 = 5;

    /// Mount with default options.
    pub fn mount(source: impl ByteSource + 'static) -> Result<Self> {
        Self::mount_with(source, &VolumeOptions::default())
    }

    /// Mount the image file or device node at `path`.
    pub fn mount_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::mount(FileByteSource::open(path)?)
    }

    /// Mount with explicit options.
    ///
    /// The superblock region is read at `base_offset + 1024`; a magic
    /// mismatch fails with [`RextError::NotAFilesystem`] and nothing
    /// else. Geometry inconsistencies fail with
    /// [`RextError::CorruptLayout`] unless the checks are skipped. No
    /// partial handle survives any mount failure.
    pub fn mount_with(source: impl ByteSource + 'static, options: &VolumeOptions) -> Result<Self> {
        let region = read_superblock_region(&source, options.base_offset)?;
        let sb = Superblock::parse(&region).map_err(superblock_error)?;
        if !options.skip_geometry_checks {
            sb.validate_geometry()
                .map_err(|err| RextError::corrupt(err.to_string()))?;
        }

        let unknown = sb.incompat.unknown_bits();
        if unknown != 0 {
            warn!(bits = format_args!("{unknown:#x}"), "proceeding despite unknown incompat feature bits");
        }

        let blocks = BlockSource::new(Box::new(source), sb.block_size, options.base_offset);
        let groups = read_group_table(&blocks, &sb)?;

        debug!(
            flavor = %sb.flavor(),
            block_size = sb.block_size.get(),
            groups = groups.len(),
            "mounted volume"
        );

        Ok(Self {
            blocks,
            sb,
            groups,
            sink: Box::new(NullSink),
        })
    }

    /// Replace the diagnostic sink.
    ///
    /// Pass a clone of a [`CollectingSink`] to keep a reading handle.
    pub fn set_diagnostic_sink(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sink = sink;
    }

    fn note(&self, event: DiagnosticEvent) {
        warn!(%event, "tolerated damage");
        self.sink.record(event);
    }

    // ── Accessors ───────────────────────────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.sb.block_size
    }

    #[must_use]
    pub fn inode_size(&self) -> u16 {
        self.sb.inode_size
    }

    #[must_use]
    pub fn blocks_count(&self) -> u64 {
        self.sb.blocks_count
    }

    #[must_use]
    pub fn inodes_count(&self) -> u32 {
        self.sb.inodes_count
    }

    #[must_use]
    pub fn group_count(&self) -> u64 {
        self.groups.len() as u64
    }

    #[must_use]
    pub fn flavor(&self) -> FsFlavor {
        self.sb.flavor()
    }

    #[must_use]
    pub fn volume_name(&self) -> &str {
        &self.sb.volume_name
    }

    #[must_use]
    pub fn uuid_string(&self) -> String {
        self.sb.uuid_string()
    }

    /// The three feature words, in compat / incompat / ro-compat order.
    #[must_use]
    pub fn features(&self) -> (CompatFeatures, IncompatFeatures, RoCompatFeatures) {
        (self.sb.compat, self.sb.incompat, self.sb.ro_compat)
    }

    // ── Inode reads ─────────────────────────────────────────────────

    /// Read and decode one inode record.
    ///
    /// Numbers below 1 or past the inode count are [`RextError::InvalidInode`];
    /// a location formula landing outside the descriptor table is
    /// [`RextError::CorruptLayout`].
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Inode> {
        if !ino.is_valid() || ino.0 > u64::from(self.sb.inodes_count) {
            return Err(RextError::InvalidInode(ino.0));
        }

        let (group, _, byte_offset) = self.sb.inode_location(ino);
        let gd = self
            .groups
            .get(group.0 as usize)
            .ok_or_else(|| {
                RextError::corrupt(format!(
                    "inode {ino} implies group {group} past the descriptor table"
                ))
            })?;

        let bs = u64::from(self.sb.block_size.get());
        let table_block = gd
            .inode_table
            .checked_add(byte_offset / bs)
            .ok_or_else(|| RextError::corrupt("inode table offset overflows u64"))?;
        let intra = usize::try_from(byte_offset % bs)
            .map_err(|_| RextError::corrupt("inode offset exceeds addressable memory"))?;

        let data = self.blocks.read_block(BlockNumber(table_block))?;
        let record = data
            .get(intra..intra + usize::from(self.sb.inode_size))
            .ok_or_else(|| RextError::corrupt("inode record crosses a block boundary"))?;
        Inode::parse(record).map_err(|err| RextError::corrupt(err.to_string()))
    }

    // ── Block mapping ───────────────────────────────────────────────

    /// Resolve an inode's data blocks in logical order.
    ///
    /// The returned list holds exactly `ceil(size / block_size)`
    /// entries; every logical position is present, holes included, so
    /// positions correspond one-to-one with file offsets.
    pub fn resolve_blocks(&self, inode: &Inode) -> Result<Vec<BlockRef>> {
        let expected = self.logical_block_count(inode.size)?;
        match inode.block_pointers() {
            BlockPointers::Legacy(slots) => self.resolve_legacy(&slots, expected),
            BlockPointers::ExtentRoot(root) => self.resolve_extents(root, expected),
        }
    }

    fn logical_block_count(&self, size: u64) -> Result<usize> {
        let count = size.div_ceil(u64::from(self.sb.block_size.get()));
        usize::try_from(count)
            .map_err(|_| RextError::corrupt("file block count exceeds addressable memory"))
    }

    fn resolve_legacy(&self, slots: &[u32; N_BLOCKS], expected: usize) -> Result<Vec<BlockRef>> {
        let mut out = Vec::new();
        for &slot in &slots[..NDIR_BLOCKS] {
            if out.len() == expected {
                break;
            }
            out.push(slot_ref(slot));
        }
        self.expand_indirect(slots[IND_BLOCK], 1, expected, &mut out)?;
        self.expand_indirect(slots[DIND_BLOCK], 2, expected, &mut out)?;
        self.expand_indirect(slots[TIND_BLOCK], 3, expected, &mut out)?;

        // A size the chain cannot cover leaves a sparse tail.
        out.resize(expected, BlockRef::Hole);
        Ok(out)
    }

    /// Expand one indirect pointer, depth-first, until `expected`
    /// logical blocks exist. A zero pointer or an unreadable pointer
    /// block stands in for its whole span as holes.
    fn expand_indirect(
        &self,
        pointer: u32,
        level: u8,
        expected: usize,
        out: &mut Vec<BlockRef>,
    ) -> Result<()> {
        if out.len() >= expected {
            return Ok(());
        }
        let per = self.blocks.block_size().pointers_per_block() as u64;
        let span = per.pow(u32::from(level));

        if pointer == 0 {
            push_hole_span(out, span, expected);
            return Ok(());
        }

        let data = match self.blocks.read_block(BlockNumber(u64::from(pointer))) {
            Ok(data) => data,
            Err(err) => {
                self.note(DiagnosticEvent::IndirectUnreadable {
                    block: u64::from(pointer),
                    level,
                    detail: err.to_string(),
                });
                push_hole_span(out, span, expected);
                return Ok(());
            }
        };

        for chunk in data.chunks_exact(4) {
            if out.len() >= expected {
                break;
            }
            let child = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if level == 1 {
                out.push(slot_ref(child));
            } else {
                self.expand_indirect(child, level - 1, expected, out)?;
            }
        }
        Ok(())
    }

    fn resolve_extents(&self, root: &[u8], expected: usize) -> Result<Vec<BlockRef>> {
        let (header, node) =
            parse_extent_node(root).map_err(|err| RextError::bad_extent(err.to_string()))?;
        if header.depth > Self::MAX_EXTENT_DEPTH {
            return Err(RextError::bad_extent(format!(
                "root depth {} exceeds the maximum of {}",
                header.depth,
                Self::MAX_EXTENT_DEPTH
            )));
        }

        let mut runs = Vec::new();
        self.collect_extent_runs(&node, header.depth, &mut runs)?;
        // Subtree skips can leave runs out of tree order.
        runs.sort_by_key(|run| run.logical);

        let mut out: Vec<BlockRef> = Vec::new();
        for run in runs {
            let start = usize::try_from(run.logical)
                .map_err(|_| RextError::corrupt("extent logical block exceeds addressable memory"))?;
            if start >= expected {
                self.note(DiagnosticEvent::MappingTruncated {
                    kept: out.len() as u64,
                    detail: format!(
                        "extent at logical block {} lies beyond the file's {expected} blocks",
                        run.logical
                    ),
                });
                continue;
            }
            if start > out.len() {
                out.resize(start, BlockRef::Hole);
            }
            let skip = out.len() - start;
            if skip > 0 {
                self.note(DiagnosticEvent::MappingTruncated {
                    kept: out.len() as u64,
                    detail: format!(
                        "extent at logical block {} overlaps an earlier run by {skip} blocks",
                        run.logical
                    ),
                });
            }
            for offset in skip..usize::from(run.len) {
                if out.len() >= expected {
                    self.note(DiagnosticEvent::MappingTruncated {
                        kept: expected as u64,
                        detail: format!(
                            "extent at logical block {} extends past the file's {expected} blocks",
                            run.logical
                        ),
                    });
                    break;
                }
                out.push(BlockRef::Mapped(BlockNumber(
                    run.physical.saturating_add(offset as u64),
                )));
            }
        }

        // Trailing logical blocks no extent covered are sparse.
        out.resize(expected, BlockRef::Hole);
        Ok(out)
    }

    /// Gather leaf runs from an extent tree, pre-order.
    ///
    /// A child that cannot be read or parsed contributes nothing while
    /// its siblings still do. Depth-discipline violations (a child not
    /// exactly one level below its parent) are hard errors, as is an
    /// index node claiming depth 0.
    fn collect_extent_runs(
        &self,
        node: &ExtentNode,
        remaining_depth: u16,
        runs: &mut Vec<ExtentRun>,
    ) -> Result<()> {
        match node {
            ExtentNode::Leaf(extents) => {
                for ext in extents {
                    runs.push(ExtentRun {
                        logical: ext.logical_block,
                        physical: ext.physical_start,
                        len: ext.len_blocks(),
                    });
                }
                Ok(())
            }
            ExtentNode::Index(indexes) => {
                if remaining_depth == 0 {
                    return Err(RextError::bad_extent("index node at depth 0"));
                }
                for idx in indexes {
                    let child = match self.blocks.read_block(BlockNumber(idx.child_block)) {
                        Ok(data) => data,
                        Err(err) => {
                            self.note(DiagnosticEvent::ExtentSubtreeSkipped {
                                child_block: idx.child_block,
                                detail: err.to_string(),
                            });
                            continue;
                        }
                    };
                    let (child_header, child_node) = match parse_extent_node(&child) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            self.note(DiagnosticEvent::ExtentSubtreeSkipped {
                                child_block: idx.child_block,
                                detail: err.to_string(),
                            });
                            continue;
                        }
                    };
                    if child_header.depth.checked_add(1) != Some(remaining_depth) {
                        return Err(RextError::bad_extent(format!(
                            "child at block {} declares depth {} under a parent expecting {}",
                            idx.child_block,
                            child_header.depth,
                            remaining_depth - 1
                        )));
                    }
                    self.collect_extent_runs(&child_node, remaining_depth - 1, runs)?;
                }
                Ok(())
            }
        }
    }

    // ── File materialization ────────────────────────────────────────

    /// Stream an inode's content into `sink`, returning bytes written.
    ///
    /// Exactly `size` bytes are produced: each block contributes
    /// `min(block_size, remaining)`, holes contribute zeros, and a
    /// mapped block that fails to read contributes zeros in place so
    /// later offsets stay aligned. No file-type check is made.
    pub fn read_file(&self, ino: InodeNumber, sink: &mut impl Write) -> Result<u64> {
        let inode = self.read_inode(ino)?;
        self.read_inode_data(&inode, sink)
    }

    /// [`Volume::read_file`] over an already-read inode.
    pub fn read_inode_data(&self, inode: &Inode, sink: &mut impl Write) -> Result<u64> {
        let blocks = self.resolve_blocks(inode)?;
        let bs = self.sb.block_size.as_usize();
        let zeros = vec![0_u8; bs];
        let mut remaining = inode.size;
        let mut written = 0_u64;

        for block_ref in blocks {
            if remaining == 0 {
                break;
            }
            let take = chunk_len(remaining, bs);
            match block_ref {
                BlockRef::Mapped(block) => match self.blocks.read_block(block) {
                    Ok(data) => sink.write_all(&data[..take])?,
                    Err(err) => {
                        self.note(DiagnosticEvent::ZeroFilledBlock {
                            block: block.0,
                            detail: err.to_string(),
                        });
                        sink.write_all(&zeros[..take])?;
                    }
                },
                BlockRef::Hole => sink.write_all(&zeros[..take])?,
            }
            remaining -= take as u64;
            written += take as u64;
        }
        Ok(written)
    }

    /// Materialize a whole file in memory.
    pub fn read_file_to_vec(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_file(ino, &mut buf)?;
        Ok(buf)
    }

    // ── Directory operations ────────────────────────────────────────

    /// List a directory, excluding `.` and `..`.
    ///
    /// Non-directory inodes produce an empty listing, not an error.
    /// Entries whose child inode cannot be read are dropped with a
    /// diagnostic; damaged blocks contribute what scanned cleanly.
    pub fn list_directory(&self, ino: InodeNumber) -> Result<Vec<FileEntry>> {
        let dir = self.read_inode(ino)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for raw in self.scan_directory(ino, &dir)? {
            if raw.is_dot() || raw.is_dotdot() {
                continue;
            }
            let child_ino = InodeNumber(u64::from(raw.inode));
            let child = match self.read_inode(child_ino) {
                Ok(child) => child,
                Err(err) => {
                    self.note(DiagnosticEvent::EntryDropped {
                        dir: ino.0,
                        child: child_ino.0,
                        name: raw.name_str(),
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            entries.push(FileEntry {
                inode: child_ino,
                is_directory: raw.is_dir(),
                name: raw.name,
                size: child.size,
                mode: child.mode,
                uid: child.uid,
                gid: child.gid,
                mtime: child.mtime,
                full_path: None,
            });
        }
        Ok(entries)
    }

    /// Raw directory records across the inode's data blocks, `.` and
    /// `..` included, in on-disk order.
    fn scan_directory(&self, ino: InodeNumber, dir: &Inode) -> Result<Vec<RawDirEntry>> {
        let blocks = self.resolve_blocks(dir)?;
        let expected = self.logical_block_count(dir.size)?;

        let mut out = Vec::new();
        for block_ref in blocks.into_iter().take(expected) {
            let BlockRef::Mapped(block) = block_ref else {
                continue;
            };
            let data = match self.blocks.read_block(block) {
                Ok(data) => data,
                Err(err) => {
                    self.note(DiagnosticEvent::DirBlockUnreadable {
                        dir: ino.0,
                        block: block.0,
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            let scan = scan_dir_block(&data);
            if let Some(stop) = scan.stop {
                if stop.is_damage() {
                    self.note(DiagnosticEvent::DirScanStopped {
                        dir: ino.0,
                        block: block.0,
                        stop,
                    });
                }
            }
            out.extend(scan.entries);
        }
        Ok(out)
    }

    /// Find one name in a directory by exact byte comparison.
    pub fn lookup(&self, dir_ino: InodeNumber, name: &[u8]) -> Result<Option<InodeNumber>> {
        let dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(RextError::NotDirectory(dir_ino.0));
        }
        for raw in self.scan_directory(dir_ino, &dir)? {
            if raw.name == name {
                return Ok(Some(InodeNumber(u64::from(raw.inode))));
            }
        }
        Ok(None)
    }

    /// Walk an absolute path from the root directory.
    ///
    /// Symlinks are not followed; an intermediate symlink fails with
    /// [`RextError::NotDirectory`].
    pub fn resolve_path(&self, path: &str) -> Result<(InodeNumber, Inode)> {
        if !path.starts_with('/') {
            return Err(RextError::Unsupported {
                detail: "only absolute paths can be resolved".to_owned(),
            });
        }

        let mut current = InodeNumber::ROOT;
        let mut inode = self.read_inode(current)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !inode.is_dir() {
                return Err(RextError::NotDirectory(current.0));
            }
            current = self
                .lookup(current, component.as_bytes())?
                .ok_or_else(|| RextError::NotFound {
                    path: component.to_owned(),
                })?;
            inode = self.read_inode(current)?;
        }
        Ok((current, inode))
    }

    /// Read a symlink's target bytes.
    ///
    /// Fast symlinks carry the target inline in the inode; longer
    /// targets are read from data blocks and cut at the first NUL.
    pub fn read_symlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_symlink() {
            return Err(RextError::Unsupported {
                detail: format!("inode {ino} is not a symbolic link"),
            });
        }
        if let Some(target) = inode.fast_symlink_target() {
            return Ok(target.to_vec());
        }

        let mut buf = Vec::new();
        self.read_inode_data(&inode, &mut buf)?;
        if let Some(pos) = buf.iter().position(|&b| b == 0) {
            buf.truncate(pos);
        }
        Ok(buf)
    }

    // ── Recursive search ────────────────────────────────────────────

    /// Depth-first, case-insensitive substring search under `start`.
    ///
    /// Matches carry their full slash-separated path relative to
    /// `start` (an empty prefix, so top-level hits read `/<name>`).
    /// A failed subtree is skipped with a diagnostic while its siblings
    /// keep contributing; cyclic directory graphs terminate via a
    /// visited set. An empty query matches every name.
    pub fn search_files(&self, start: InodeNumber, query: &str) -> Result<Vec<FileEntry>> {
        let needle = query.to_lowercase();
        let mut visited = HashSet::new();
        let mut matches = Vec::new();
        self.search_dir(start, &needle, "", &mut visited, &mut matches)?;
        Ok(matches)
    }

    fn search_dir(
        &self,
        dir: InodeNumber,
        needle: &str,
        prefix: &str,
        visited: &mut HashSet<InodeNumber>,
        matches: &mut Vec<FileEntry>,
    ) -> Result<()> {
        if !visited.insert(dir) {
            return Ok(());
        }

        for entry in self.list_directory(dir)? {
            let name = entry.name_str();
            let path = format!("{prefix}/{name}");
            let child = entry.inode;
            let descend = entry.is_directory;

            if name.to_lowercase().contains(needle) {
                let mut hit = entry;
                hit.full_path = Some(path.clone());
                matches.push(hit);
            }

            if descend {
                // Fold each subtree's outcome here: damage below this
                // point costs the subtree, never the siblings.
                if let Err(err) = self.search_dir(child, needle, &path, visited, matches) {
                    if err.is_subtree_recoverable() {
                        self.note(DiagnosticEvent::SearchSubtreeSkipped {
                            dir: child.0,
                            path,
                            detail: err.to_string(),
                        });
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Free helpers ────────────────────────────────────────────────────────────

fn superblock_error(err: ParseError) -> RextError {
    match err {
        ParseError::BadMagic { .. } => RextError::NotAFilesystem,
        other => RextError::corrupt(other.to_string()),
    }
}

/// Read the whole group descriptor table, block by block.
fn read_group_table(blocks: &BlockSource, sb: &Superblock) -> Result<Vec<GroupDescriptor>> {
    let desc_size = usize::from(sb.group_desc_size());
    let per_block = sb.block_size.as_usize() / desc_size;
    if per_block == 0 {
        return Err(RextError::corrupt("group descriptor larger than a block"));
    }
    let total = usize::try_from(sb.group_count())
        .map_err(|_| RextError::corrupt("group count exceeds addressable memory"))?;

    let first = sb.gdt_start_block();
    let mut groups = Vec::with_capacity(total);
    let mut block_index = 0_u64;
    while groups.len() < total {
        let block = first
            .checked_add(block_index)
            .ok_or_else(|| RextError::corrupt("descriptor table offset overflows u64"))?;
        let data = blocks.read_block(BlockNumber(block))?;
        for chunk in data.chunks_exact(desc_size) {
            if groups.len() == total {
                break;
            }
            let gd = GroupDescriptor::parse(chunk, sb.group_desc_size())
                .map_err(|err| RextError::corrupt(err.to_string()))?;
            groups.push(gd);
        }
        block_index += 1;
    }
    Ok(groups)
}

fn slot_ref(slot: u32) -> BlockRef {
    if slot == 0 {
        BlockRef::Hole
    } else {
        BlockRef::Mapped(BlockNumber(u64::from(slot)))
    }
}

/// Append holes for an indirect pointer's whole span, capped at the
/// expected total.
fn push_hole_span(out: &mut Vec<BlockRef>, span: u64, expected: usize) {
    let want = expected.saturating_sub(out.len());
    let n = usize::try_from(span).map_or(want, |s| s.min(want));
    let target = out.len() + n;
    out.resize(target, BlockRef::Hole);
}

/// Bytes a block contributes: `min(block_size, remaining)`.
fn chunk_len(remaining: u64, block_size: usize) -> usize {
    usize::try_from(remaining).map_or(block_size, |r| r.min(block_size))
}
