//! ext2/3/4 structure parsing.
//!
//! Field offsets follow the kernel's `struct ext4_super_block`,
//! `struct ext4_group_desc`, `struct ext4_inode` and `struct
//! ext4_extent_header`; all integers are little-endian. Parsers take
//! plain byte slices and return [`rext_types::ParseError`] on
//! structural damage; mapping those onto operational errors is the
//! caller's business.

use rext_types::{
    BLOCK_POINTER_BYTES, BlockSize, EXT_INIT_MAX_LEN, EXT_SUPER_MAGIC, EXTENT_MAGIC, EXTENTS_FL,
    GOOD_OLD_INODE_SIZE, GOOD_OLD_REV, GroupNumber, InodeNumber, N_BLOCKS, ParseError, S_IFDIR,
    S_IFLNK, S_IFMT, S_IFREG, ensure_slice, read_fixed, read_le_u16, read_le_u32,
    trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── Feature flag words ──────────────────────────────────────────────────────

fn format_flags(bits: u32, known: &[(u32, &str)]) -> String {
    let mut names: Vec<&str> = Vec::new();
    let mut rest = bits;
    for &(bit, name) in known {
        if bits & bit != 0 {
            names.push(name);
            rest &= !bit;
        }
    }
    match (names.is_empty(), rest) {
        (true, 0) => "none".to_owned(),
        (false, 0) => names.join("|"),
        (true, _) => format!("{rest:#x}"),
        (false, _) => format!("{}|{rest:#x}", names.join("|")),
    }
}

/// `s_feature_compat`: features a reader may ignore entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    pub const DIR_PREALLOC: Self = Self(0x0001);
    pub const IMAGIC_INODES: Self = Self(0x0002);
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);
    pub const SPARSE_SUPER2: Self = Self(0x0200);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "dir_prealloc"),
        (0x0002, "imagic_inodes"),
        (0x0004, "has_journal"),
        (0x0008, "ext_attr"),
        (0x0010, "resize_inode"),
        (0x0020, "dir_index"),
        (0x0200, "sparse_super2"),
    ];

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Pipe-joined feature names, unknown bits as a hex residue.
    #[must_use]
    pub fn describe(self) -> String {
        format_flags(self.0, Self::KNOWN)
    }
}

/// `s_feature_incompat`: features a reader must understand to interpret
/// the volume at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);
    pub const EXTENTS: Self = Self(0x0040);
    pub const BIT64: Self = Self(0x0080);
    pub const MMP: Self = Self(0x0100);
    pub const FLEX_BG: Self = Self(0x0200);
    pub const EA_INODE: Self = Self(0x0400);
    pub const DIRDATA: Self = Self(0x1000);
    pub const CSUM_SEED: Self = Self(0x2000);
    pub const LARGEDIR: Self = Self(0x4000);
    pub const INLINE_DATA: Self = Self(0x8000);
    pub const ENCRYPT: Self = Self(0x0001_0000);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "compression"),
        (0x0002, "filetype"),
        (0x0004, "recover"),
        (0x0008, "journal_dev"),
        (0x0010, "meta_bg"),
        (0x0040, "extents"),
        (0x0080, "64bit"),
        (0x0100, "mmp"),
        (0x0200, "flex_bg"),
        (0x0400, "ea_inode"),
        (0x1000, "dirdata"),
        (0x2000, "csum_seed"),
        (0x4000, "largedir"),
        (0x8000, "inline_data"),
        (0x0001_0000, "encrypt"),
    ];

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits this interpreter has never heard of.
    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        let mut rest = self.0;
        for &(bit, _) in Self::KNOWN {
            rest &= !bit;
        }
        rest
    }

    #[must_use]
    pub fn describe(self) -> String {
        format_flags(self.0, Self::KNOWN)
    }
}

/// `s_feature_ro_compat`: features a read-only reader may ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoCompatFeatures(pub u32);

impl RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const HUGE_FILE: Self = Self(0x0008);
    pub const GDT_CSUM: Self = Self(0x0010);
    pub const DIR_NLINK: Self = Self(0x0020);
    pub const EXTRA_ISIZE: Self = Self(0x0040);
    pub const QUOTA: Self = Self(0x0100);
    pub const BIGALLOC: Self = Self(0x0200);
    pub const METADATA_CSUM: Self = Self(0x0400);
    pub const PROJECT: Self = Self(0x2000);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "sparse_super"),
        (0x0002, "large_file"),
        (0x0008, "huge_file"),
        (0x0010, "gdt_csum"),
        (0x0020, "dir_nlink"),
        (0x0040, "extra_isize"),
        (0x0100, "quota"),
        (0x0200, "bigalloc"),
        (0x0400, "metadata_csum"),
        (0x2000, "project"),
    ];

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn describe(self) -> String {
        format_flags(self.0, Self::KNOWN)
    }
}

// ── Filesystem flavor ───────────────────────────────────────────────────────

/// Which member of the ext family the feature words indicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsFlavor {
    Ext2,
    Ext3,
    Ext4,
}

impl FsFlavor {
    /// Classify from feature words.
    ///
    /// ext4-only features win over the journal bit; a journal with no
    /// ext4 features means ext3; neither means ext2. The distinction is
    /// informational — interpretation is driven by per-inode flags, not
    /// the flavor.
    #[must_use]
    pub fn detect(
        compat: CompatFeatures,
        incompat: IncompatFeatures,
        ro_compat: RoCompatFeatures,
    ) -> Self {
        let ext4_incompat = IncompatFeatures::EXTENTS.0
            | IncompatFeatures::BIT64.0
            | IncompatFeatures::FLEX_BG.0
            | IncompatFeatures::MMP.0
            | IncompatFeatures::EA_INODE.0
            | IncompatFeatures::INLINE_DATA.0
            | IncompatFeatures::LARGEDIR.0
            | IncompatFeatures::ENCRYPT.0;
        let ext4_ro = RoCompatFeatures::HUGE_FILE.0
            | RoCompatFeatures::GDT_CSUM.0
            | RoCompatFeatures::DIR_NLINK.0
            | RoCompatFeatures::EXTRA_ISIZE.0
            | RoCompatFeatures::METADATA_CSUM.0
            | RoCompatFeatures::BIGALLOC.0;

        if incompat.0 & ext4_incompat != 0 || ro_compat.0 & ext4_ro != 0 {
            Self::Ext4
        } else if compat.contains(CompatFeatures::HAS_JOURNAL) {
            Self::Ext3
        } else {
            Self::Ext2
        }
    }
}

impl std::fmt::Display for FsFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
        };
        f.write_str(name)
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Parsed superblock, reduced to the fields interpretation needs.
///
/// `block_size` and `inode_size` are already derived: the block size
/// from `s_log_block_size`, the inode size from the revision gate (128
/// under revision 0, `s_inode_size` afterwards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub first_data_block: u32,
    pub block_size: BlockSize,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub rev_level: u32,
    pub inode_size: u16,
    pub volume_name: String,
    pub uuid: [u8; 16],
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
    pub desc_size: u16,
}

impl Superblock {
    /// Parse the 1024-byte superblock region.
    ///
    /// The magic is checked first so that a non-ext image fails with
    /// [`ParseError::BadMagic`] before any other field is trusted.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT_SUPER_MAGIC {
            return Err(ParseError::BadMagic {
                expected: u64::from(EXT_SUPER_MAGIC),
                found: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let block_size =
            BlockSize::from_log(log_block_size).ok_or(ParseError::BadField {
                field: "s_log_block_size",
                reason: "block size out of supported range",
            })?;

        let rev_level = read_le_u32(region, 0x4C)?;
        let inode_size = if rev_level == GOOD_OLD_REV {
            GOOD_OLD_INODE_SIZE
        } else {
            read_le_u16(region, 0x58)?
        };

        let compat = CompatFeatures(read_le_u32(region, 0x5C)?);
        let incompat = IncompatFeatures(read_le_u32(region, 0x60)?);
        let ro_compat = RoCompatFeatures(read_le_u32(region, 0x64)?);

        let blocks_lo = u64::from(read_le_u32(region, 0x04)?);
        let blocks_hi = if incompat.contains(IncompatFeatures::BIT64) {
            u64::from(read_le_u32(region, 0x150)?)
        } else {
            0
        };

        let volume_name_raw = read_fixed::<16>(region, 0x78)?;
        let volume_name =
            String::from_utf8_lossy(trim_nul_padded(&volume_name_raw)).into_owned();

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: blocks_lo | (blocks_hi << 32),
            first_data_block: read_le_u32(region, 0x14)?,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            rev_level,
            inode_size,
            volume_name,
            uuid: read_fixed::<16>(region, 0x68)?,
            compat,
            incompat,
            ro_compat,
            desc_size: read_le_u16(region, 0xFE)?,
        })
    }

    /// Sanity-check the geometry fields against each other.
    ///
    /// Magic alone does not make a mountable volume: the arithmetic the
    /// interpreter runs on these fields must not divide by zero or walk
    /// off the device.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.blocks_per_group == 0 {
            return Err(ParseError::BadField {
                field: "s_blocks_per_group",
                reason: "must be nonzero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::BadField {
                field: "s_inodes_per_group",
                reason: "must be nonzero",
            });
        }

        let bits_per_block = self.block_size.get().saturating_mul(8);
        if self.blocks_per_group > bits_per_block {
            return Err(ParseError::BadField {
                field: "s_blocks_per_group",
                reason: "exceeds one block bitmap",
            });
        }
        if self.inodes_per_group > bits_per_block {
            return Err(ParseError::BadField {
                field: "s_inodes_per_group",
                reason: "exceeds one inode bitmap",
            });
        }

        if !self.inode_size.is_power_of_two() || self.inode_size < GOOD_OLD_INODE_SIZE {
            return Err(ParseError::BadField {
                field: "s_inode_size",
                reason: "must be a power of two, at least 128",
            });
        }
        if u32::from(self.inode_size) > self.block_size.get() {
            return Err(ParseError::BadField {
                field: "s_inode_size",
                reason: "exceeds block size",
            });
        }

        if self.desc_size != 0 {
            if self.desc_size < 32 {
                return Err(ParseError::BadField {
                    field: "s_desc_size",
                    reason: "smaller than the 32-byte base layout",
                });
            }
            if u32::from(self.desc_size) > self.block_size.get() {
                return Err(ParseError::BadField {
                    field: "s_desc_size",
                    reason: "exceeds block size",
                });
            }
        }
        if self.incompat.contains(IncompatFeatures::BIT64) && self.group_desc_size() < 64 {
            return Err(ParseError::BadField {
                field: "s_desc_size",
                reason: "64bit feature requires 64-byte descriptors",
            });
        }

        // first_data_block is 1 for 1K volumes (the superblock occupies
        // block 0's second kilobyte), 0 for every larger block size.
        let expected_first = u32::from(self.block_size.get() == 1024);
        if self.first_data_block != expected_first {
            return Err(ParseError::BadField {
                field: "s_first_data_block",
                reason: "inconsistent with block size",
            });
        }
        if self.blocks_count <= u64::from(self.first_data_block) {
            return Err(ParseError::BadField {
                field: "s_blocks_count",
                reason: "volume has no data blocks",
            });
        }

        Ok(())
    }

    /// ext2/ext3/ext4 classification from the feature words.
    #[must_use]
    pub fn flavor(&self) -> FsFlavor {
        FsFlavor::detect(self.compat, self.incompat, self.ro_compat)
    }

    /// Number of block groups (ceiling division over the data span).
    #[must_use]
    pub fn group_count(&self) -> u64 {
        rext_types::group_count(
            self.blocks_count,
            u64::from(self.first_data_block),
            self.blocks_per_group,
        )
    }

    /// Effective group descriptor size: 32 bytes unless 64bit is on.
    #[must_use]
    pub fn group_desc_size(&self) -> u16 {
        if self.incompat.contains(IncompatFeatures::BIT64) {
            self.desc_size.max(64)
        } else {
            32
        }
    }

    /// First block of the group descriptor table.
    #[must_use]
    pub fn gdt_start_block(&self) -> u64 {
        u64::from(self.first_data_block) + 1
    }

    /// Locate an inode: its group, index within the group's table, and
    /// byte offset from the table's start.
    #[must_use]
    pub fn inode_location(&self, ino: InodeNumber) -> (GroupNumber, u32, u64) {
        let group = rext_types::inode_group(ino, self.inodes_per_group);
        let index = rext_types::inode_index_in_group(ino, self.inodes_per_group);
        let byte_offset = u64::from(index) * u64::from(self.inode_size);
        (group, index, byte_offset)
    }

    /// The UUID in customary 8-4-4-4-12 hex form.
    #[must_use]
    pub fn uuid_string(&self) -> String {
        let u = &self.uuid;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12],
            u[13], u[14], u[15]
        )
    }
}

// ── Group descriptors ───────────────────────────────────────────────────────

/// One block group's descriptor.
///
/// The three table pointers carry high halves when the volume uses
/// 64-byte descriptors; free counts likewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub used_dirs_count: u32,
}

impl GroupDescriptor {
    pub fn parse(bytes: &[u8], desc_size: u16) -> Result<Self, ParseError> {
        let ds = usize::from(desc_size);
        if ds < 32 {
            return Err(ParseError::BadField {
                field: "s_desc_size",
                reason: "smaller than the 32-byte base layout",
            });
        }
        ensure_slice(bytes, 0, ds)?;

        let block_bitmap_lo = u64::from(read_le_u32(bytes, 0x00)?);
        let inode_bitmap_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let inode_table_lo = u64::from(read_le_u32(bytes, 0x08)?);
        let free_blocks_lo = u32::from(read_le_u16(bytes, 0x0C)?);
        let free_inodes_lo = u32::from(read_le_u16(bytes, 0x0E)?);
        let used_dirs_lo = u32::from(read_le_u16(bytes, 0x10)?);

        if ds < 64 {
            return Ok(Self {
                block_bitmap: block_bitmap_lo,
                inode_bitmap: inode_bitmap_lo,
                inode_table: inode_table_lo,
                free_blocks_count: free_blocks_lo,
                free_inodes_count: free_inodes_lo,
                used_dirs_count: used_dirs_lo,
            });
        }

        Ok(Self {
            block_bitmap: block_bitmap_lo | (u64::from(read_le_u32(bytes, 0x20)?) << 32),
            inode_bitmap: inode_bitmap_lo | (u64::from(read_le_u32(bytes, 0x24)?) << 32),
            inode_table: inode_table_lo | (u64::from(read_le_u32(bytes, 0x28)?) << 32),
            free_blocks_count: free_blocks_lo | (u32::from(read_le_u16(bytes, 0x2C)?) << 16),
            free_inodes_count: free_inodes_lo | (u32::from(read_le_u16(bytes, 0x2E)?) << 16),
            used_dirs_count: used_dirs_lo | (u32::from(read_le_u16(bytes, 0x30)?) << 16),
        })
    }
}

// ── Inode records ───────────────────────────────────────────────────────────

/// Parsed inode record (128-byte base layout; larger records carry
/// extended timestamps this interpreter does not read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    /// Full 64-bit size (`i_size` | `i_size_high` << 32).
    pub size: u64,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub links_count: u16,
    pub flags: u32,
    /// The 60-byte block-pointer area, uninterpreted.
    ///
    /// Decode with [`Inode::block_pointers`]; its meaning depends on
    /// the extents flag.
    pub block_area: Vec<u8>,
}

impl Inode {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, 128)?;

        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        // osd2, Linux layout
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = u64::from(read_le_u32(bytes, 0x6C)?);

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            flags: read_le_u32(bytes, 0x20)?,
            block_area: ensure_slice(bytes, 0x28, BLOCK_POINTER_BYTES)?.to_vec(),
        })
    }

    #[must_use]
    pub fn file_type_bits(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_bits() == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == S_IFLNK
    }

    #[must_use]
    pub fn uses_extents(&self) -> bool {
        self.flags & EXTENTS_FL != 0
    }

    /// Decode the block-pointer area into its two meanings.
    ///
    /// The extents flag decides; the bytes themselves are ambiguous.
    #[must_use]
    pub fn block_pointers(&self) -> BlockPointers<'_> {
        if self.uses_extents() {
            BlockPointers::ExtentRoot(&self.block_area)
        } else {
            let mut slots = [0_u32; N_BLOCKS];
            for (slot, chunk) in slots.iter_mut().zip(self.block_area.chunks_exact(4)) {
                *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            BlockPointers::Legacy(slots)
        }
    }

    /// Inline target of a fast symlink, when this is one.
    ///
    /// Targets shorter than the 60-byte block-pointer area live
    /// directly inside it on non-extent symlink inodes; a 60-byte
    /// target no longer fits with its terminator and is block-backed.
    #[must_use]
    pub fn fast_symlink_target(&self) -> Option<&[u8]> {
        if !self.is_symlink() || self.uses_extents() {
            return None;
        }
        let len = usize::try_from(self.size).ok()?;
        (len < self.block_area.len()).then(|| &self.block_area[..len])
    }
}

/// The two readings of an inode's block-pointer area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPointers<'a> {
    /// 15 u32 slots: 12 direct, then single/double/triple indirect.
    Legacy([u32; N_BLOCKS]),
    /// The area is the root node of an extent tree.
    ExtentRoot(&'a [u8]),
}

// ── Extent tree nodes ───────────────────────────────────────────────────────

/// 12-byte header at the front of every extent tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentHeader {
    pub magic: u16,
    pub entries: u16,
    pub max_entries: u16,
    pub depth: u16,
    pub generation: u32,
}

/// Leaf entry: a contiguous logical→physical run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub logical_block: u32,
    pub raw_len: u16,
    /// 48-bit physical start (`ee_start_hi` << 32 | `ee_start_lo`).
    pub physical_start: u64,
}

impl Extent {
    /// Lengths above `EXT_INIT_MAX_LEN` mark unwritten extents.
    #[must_use]
    pub fn is_unwritten(self) -> bool {
        self.raw_len > EXT_INIT_MAX_LEN
    }

    /// Run length in blocks with the unwritten bit removed.
    #[must_use]
    pub fn len_blocks(self) -> u16 {
        if self.raw_len <= EXT_INIT_MAX_LEN {
            self.raw_len
        } else {
            self.raw_len - EXT_INIT_MAX_LEN
        }
    }
}

/// Interior entry: pointer to a child node one level down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentIndex {
    pub logical_block: u32,
    pub child_block: u64,
}

/// A parsed node body: leaves at depth 0, indexes above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentNode {
    Leaf(Vec<Extent>),
    Index(Vec<ExtentIndex>),
}

/// Parse one extent tree node (inode root area or a full block).
pub fn parse_extent_node(bytes: &[u8]) -> Result<(ExtentHeader, ExtentNode), ParseError> {
    ensure_slice(bytes, 0, 12)?;
    let header = ExtentHeader {
        magic: read_le_u16(bytes, 0x00)?,
        entries: read_le_u16(bytes, 0x02)?,
        max_entries: read_le_u16(bytes, 0x04)?,
        depth: read_le_u16(bytes, 0x06)?,
        generation: read_le_u32(bytes, 0x08)?,
    };

    if header.magic != EXTENT_MAGIC {
        return Err(ParseError::BadMagic {
            expected: u64::from(EXTENT_MAGIC),
            found: u64::from(header.magic),
        });
    }
    if header.entries > header.max_entries {
        return Err(ParseError::BadField {
            field: "eh_entries",
            reason: "exceeds eh_max",
        });
    }

    let count = usize::from(header.entries);
    ensure_slice(bytes, 12, count.saturating_mul(12))?;

    let node = if header.depth == 0 {
        let mut extents = Vec::with_capacity(count);
        for i in 0..count {
            let base = 12 + i * 12;
            let start_hi = u64::from(read_le_u16(bytes, base + 6)?);
            let start_lo = u64::from(read_le_u32(bytes, base + 8)?);
            extents.push(Extent {
                logical_block: read_le_u32(bytes, base)?,
                raw_len: read_le_u16(bytes, base + 4)?,
                physical_start: start_lo | (start_hi << 32),
            });
        }
        ExtentNode::Leaf(extents)
    } else {
        let mut indexes = Vec::with_capacity(count);
        for i in 0..count {
            let base = 12 + i * 12;
            let child_lo = u64::from(read_le_u32(bytes, base + 4)?);
            let child_hi = u64::from(read_le_u16(bytes, base + 8)?);
            indexes.push(ExtentIndex {
                logical_block: read_le_u32(bytes, base)?,
                child_block: child_lo | (child_hi << 32),
            });
        }
        ExtentNode::Index(indexes)
    };

    Ok((header, node))
}

// ── Directory entry streams ─────────────────────────────────────────────────

/// One live directory entry.
///
/// Names are raw on-disk bytes; the format mandates no encoding.
/// [`DirEntry::name_str`] is the one sanctioned text decoding:
/// best-effort UTF-8 with lossy replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Lossy UTF-8 rendering of the name.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Whether the file-type tag marks a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == rext_types::FT_DIR
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// Why a block's scan ended before the block did.
///
/// All of these end the scan quietly — one damaged record must not cost
/// the caller the entries already decoded — but each carries enough to
/// report where the damage was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStop {
    /// Fewer than 8 header bytes remained.
    HeaderTruncated { offset: usize },
    /// `rec_len` of zero: the block's entry stream is over.
    ZeroRecLen { offset: usize },
    /// `rec_len` would cross the block boundary.
    RecLenOverrun { offset: usize },
    /// The name does not fit inside its own record.
    NameOverrun { offset: usize },
}

impl ScanStop {
    /// Whether this stop indicates damage (vs. the ordinary terminator).
    #[must_use]
    pub fn is_damage(self) -> bool {
        !matches!(self, Self::ZeroRecLen { .. })
    }
}

/// Result of scanning one directory data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirScan {
    /// Live entries in on-disk order, `.`/`..` included.
    pub entries: Vec<DirEntry>,
    /// Set when the scan ended before the block's last byte.
    pub stop: Option<ScanStop>,
}

/// Scan one directory data block into its live entries.
///
/// Walks the `rec_len` chain: deleted records (inode 0) are stepped
/// over, and the four damage conditions stop the scan at the record
/// where they were detected, keeping everything decoded so far.
#[must_use]
pub fn scan_dir_block(block: &[u8]) -> DirScan {
    let mut entries = Vec::new();
    let mut offset = 0_usize;

    let stop = loop {
        if offset + 8 > block.len() {
            // The usual exit for a fully-packed block is exact
            // exhaustion; anything else is a truncated header.
            if offset == block.len() {
                break None;
            }
            break Some(ScanStop::HeaderTruncated { offset });
        }

        // Infallible: the 8-byte window was just checked.
        let inode = u32::from_le_bytes([
            block[offset],
            block[offset + 1],
            block[offset + 2],
            block[offset + 3],
        ]);
        let rec_len = u16::from_le_bytes([block[offset + 4], block[offset + 5]]);
        let name_len = block[offset + 6];
        let file_type = block[offset + 7];

        if rec_len == 0 {
            break Some(ScanStop::ZeroRecLen { offset });
        }
        let entry_end = offset + usize::from(rec_len);
        if entry_end > block.len() {
            break Some(ScanStop::RecLenOverrun { offset });
        }

        if inode != 0 {
            let name_end = offset + 8 + usize::from(name_len);
            if name_end > entry_end {
                break Some(ScanStop::NameOverrun { offset });
            }
            entries.push(DirEntry {
                inode,
                rec_len,
                file_type,
                name: block[offset + 8..name_end].to_vec(),
            });
        }

        offset = entry_end;
    };

    DirScan { entries, stop }
}
