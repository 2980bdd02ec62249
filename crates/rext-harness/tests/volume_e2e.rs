#![forbid(unsafe_code)]
//! End-to-end interpretation over synthetic images.
//!
//! Every test builds its own image with [`ImageBuilder`], mounts it, and
//! drives the public volume operations the way a caller would.

use rext::{BlockNumber, BlockRef, FsFlavor, InodeNumber, MemByteSource, Volume, VolumeOptions};
use rext_harness::{FT_DIR, FT_REG, FT_SYMLINK, ImageBuilder};
use rext_types::{S_IFDIR, S_IFREG};
use std::io::Write;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn mount_reports_identity_and_geometry() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.volume_name("e2e-vol");
    builder.uuid([
        0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
        0xCD, 0xEF,
    ]);
    builder.dir(2, 2, &[]);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    assert_eq!(volume.block_size().get(), 1024);
    assert_eq!(volume.inode_size(), 128);
    assert_eq!(volume.blocks_count(), 64);
    assert_eq!(volume.group_count(), 1);
    assert_eq!(volume.volume_name(), "e2e-vol");
    assert_eq!(volume.uuid_string(), "01234567-89ab-cdef-0123-456789abcdef");
    assert_eq!(volume.flavor(), FsFlavor::Ext2);
}

#[test]
fn flavor_tracks_feature_words() {
    let mut plain = ImageBuilder::new(1024, 64);
    plain.dir(2, 2, &[]);
    assert_eq!(
        Volume::mount(plain.into_source()).expect("mount").flavor(),
        FsFlavor::Ext2
    );

    let mut journaled = ImageBuilder::new(1024, 64);
    journaled.compat(0x0004); // has_journal
    journaled.dir(2, 2, &[]);
    assert_eq!(
        Volume::mount(journaled.into_source())
            .expect("mount")
            .flavor(),
        FsFlavor::Ext3
    );

    let mut extents = ImageBuilder::new(1024, 64);
    extents.compat(0x0004);
    extents.incompat(0x0040); // extents
    extents.dir(2, 2, &[]);
    assert_eq!(
        Volume::mount(extents.into_source()).expect("mount").flavor(),
        FsFlavor::Ext4
    );
}

#[test]
fn wrong_magic_fails_mount_with_not_a_filesystem() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.dir(2, 2, &[]);
    // Break the magic and poison the geometry; the magic must win.
    builder.poke(1024 + 0x38, &[0x55, 0xAA]);
    builder.poke(1024 + 0x18, &99_u32.to_le_bytes());

    let err = Volume::mount(builder.into_source()).expect_err("mount must fail");
    assert!(matches!(err, rext::RextError::NotAFilesystem));
}

#[test]
fn read_inode_zero_is_invalid() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.dir(2, 2, &[]);
    let volume = Volume::mount(builder.into_source()).expect("mount");
    assert!(matches!(
        volume.read_inode(InodeNumber(0)),
        Err(rext::RextError::InvalidInode(0))
    ));
}

#[test]
fn hole_free_content_round_trips_byte_exact() {
    // 2600 bytes: two full blocks plus a 552-byte tail.
    let content = patterned(2600);
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"data.bin", 11, FT_REG)]);
    builder.file_direct(11, &content);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let (ino, inode) = volume.resolve_path("/data.bin").expect("resolve");
    assert_eq!(ino, InodeNumber(11));
    assert_eq!(inode.size, 2600);

    let back = volume.read_file_to_vec(ino).expect("read");
    assert_eq!(back, content);

    let mut sink = Vec::new();
    let written = volume.read_file(ino, &mut sink).expect("read");
    assert_eq!(written, 2600);
    assert_eq!(sink, content);
}

#[test]
fn all_zero_pointer_file_materializes_exactly_its_size_in_zeros() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.dir(2, 2, &[(b"sparse", 11, FT_REG)]);
    builder.inode(11, S_IFREG | 0o644, 5000);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let content = volume.read_file_to_vec(InodeNumber(11)).expect("read");
    assert_eq!(content.len(), 5000);
    assert!(content.iter().all(|&b| b == 0));
}

#[test]
fn listings_join_metadata_and_exclude_dot_entries() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(
        2,
        2,
        &[
            (b"notes.txt", 11, FT_REG),
            (b"docs", 5, FT_DIR),
            (b"link", 7, FT_SYMLINK),
        ],
    );
    builder.file_direct(11, b"hello");
    builder.dir(5, 2, &[]);
    builder.symlink(7, b"notes.txt");

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let entries = volume.list_directory(InodeNumber::ROOT).expect("list");
    let names: Vec<String> = entries.iter().map(|e| e.name_str()).collect();
    assert_eq!(names, vec!["notes.txt", "docs", "link"]);

    assert!(!entries[0].is_directory);
    assert_eq!(entries[0].size, 5);
    assert!(entries[1].is_directory);
    assert!(!entries[2].is_directory);
    assert!(entries.iter().all(|e| e.full_path.is_none()));

    // A regular file lists as empty, not as an error.
    assert!(volume.list_directory(InodeNumber(11)).expect("list").is_empty());
}

#[test]
fn two_level_extent_tree_resolves_to_the_hand_computed_sequence() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"frag.bin", 11, FT_REG)]);

    // Seven data blocks in three physical runs.
    let d: Vec<u64> = (0..7).map(|_| builder.alloc_block()).collect();
    let content = patterned(7 * 1024);
    for (i, chunk) in content.chunks(1024).enumerate() {
        builder.write_block_at(d[i], 0, chunk);
    }

    let leaf_a = builder.alloc_block();
    let leaf_b = builder.alloc_block();
    builder.extent_leaf_block(leaf_a, &[(0, 2, d[0]), (2, 2, d[2])]);
    builder.extent_leaf_block(leaf_b, &[(4, 3, d[4])]);

    builder.inode(11, S_IFREG | 0o644, 7 * 1024);
    builder.extent_index_root(11, 1, &[(0, leaf_a), (4, leaf_b)]);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let inode = volume.read_inode(InodeNumber(11)).expect("inode");
    let blocks = volume.resolve_blocks(&inode).expect("resolve");

    let expected: Vec<BlockRef> = [d[0], d[0] + 1, d[2], d[2] + 1, d[4], d[4] + 1, d[4] + 2]
        .iter()
        .map(|&b| BlockRef::Mapped(BlockNumber(b)))
        .collect();
    assert_eq!(blocks, expected);

    let back = volume.read_file_to_vec(InodeNumber(11)).expect("read");
    assert_eq!(back, content);
}

#[test]
fn extent_logical_gaps_read_back_as_zeros() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"gappy", 11, FT_REG)]);

    let d0 = builder.alloc_block();
    let d3 = builder.alloc_block();
    builder.write_block_at(d0, 0, &[0x11; 1024]);
    builder.write_block_at(d3, 0, &[0x22; 1024]);

    builder.inode(11, S_IFREG | 0o644, 4 * 1024);
    builder.extent_leaf_root(11, &[(0, 1, d0), (3, 1, d3)]);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let inode = volume.read_inode(InodeNumber(11)).expect("inode");
    let blocks = volume.resolve_blocks(&inode).expect("resolve");
    assert_eq!(blocks[1], BlockRef::Hole);
    assert_eq!(blocks[2], BlockRef::Hole);

    let content = volume.read_file_to_vec(InodeNumber(11)).expect("read");
    assert_eq!(content.len(), 4096);
    assert!(content[..1024].iter().all(|&b| b == 0x11));
    assert!(content[1024..3072].iter().all(|&b| b == 0));
    assert!(content[3072..].iter().all(|&b| b == 0x22));
}

#[test]
fn indirect_chains_resolve_every_level_in_order() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"deep.bin", 11, FT_REG)]);

    // 12 direct + 256 single + 2 double = 270 logical blocks.
    builder.inode(11, S_IFREG | 0o644, 270 * 1024);
    for slot in 0..12 {
        builder.block_slot(11, slot, 2000 + slot as u32);
    }

    let single = builder.alloc_block();
    let mut pointers: Vec<u32> = (0..256).map(|i| 3000 + i).collect();
    pointers[100] = 0; // a hole inside the chain
    builder.indirect_block(single, &pointers);
    builder.block_slot(11, 12, single as u32);

    let double = builder.alloc_block();
    let double_child = builder.alloc_block();
    builder.indirect_block(double, &[double_child as u32]);
    builder.indirect_block(double_child, &[5000, 5001]);
    builder.block_slot(11, 13, double as u32);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let inode = volume.read_inode(InodeNumber(11)).expect("inode");
    let blocks = volume.resolve_blocks(&inode).expect("resolve");

    assert_eq!(blocks.len(), 270);
    assert_eq!(blocks[0], BlockRef::Mapped(BlockNumber(2000)));
    assert_eq!(blocks[11], BlockRef::Mapped(BlockNumber(2011)));
    assert_eq!(blocks[12], BlockRef::Mapped(BlockNumber(3000)));
    assert_eq!(blocks[12 + 100], BlockRef::Hole);
    assert_eq!(blocks[12 + 255], BlockRef::Mapped(BlockNumber(3255)));
    assert_eq!(blocks[268], BlockRef::Mapped(BlockNumber(5000)));
    assert_eq!(blocks[269], BlockRef::Mapped(BlockNumber(5001)));
}

#[test]
fn triple_indirect_ladder_reaches_the_last_logical_block() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"huge", 11, FT_REG)]);

    // 12 direct + 256 single + 65536 double + 1 triple logical blocks;
    // only the pointer spine is populated, everything else is sparse.
    let logical_blocks = 12_u64 + 256 + 65536 + 1;
    builder.inode(11, S_IFREG | 0o644, logical_blocks * 1024);

    let single = builder.alloc_block();
    builder.indirect_block(single, &[]);
    builder.block_slot(11, 12, single as u32);

    let double = builder.alloc_block();
    builder.indirect_block(double, &[]);
    builder.block_slot(11, 13, double as u32);

    let triple = builder.alloc_block();
    let mid = builder.alloc_block();
    let leaf = builder.alloc_block();
    builder.indirect_block(triple, &[mid as u32]);
    builder.indirect_block(mid, &[leaf as u32]);
    builder.indirect_block(leaf, &[7000]);
    builder.block_slot(11, 14, triple as u32);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let inode = volume.read_inode(InodeNumber(11)).expect("inode");
    let blocks = volume.resolve_blocks(&inode).expect("resolve");

    assert_eq!(blocks.len(), logical_blocks as usize);
    let last = blocks[blocks.len() - 1];
    assert_eq!(last, BlockRef::Mapped(BlockNumber(7000)));
    // Everything between the direct slots and the final block is sparse.
    assert!(blocks[..blocks.len() - 1].iter().all(|b| b.is_hole()));
}

#[test]
fn search_walks_three_levels_and_agrees_with_path_resolution() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(
        2,
        2,
        &[(b"alpha_hit.txt", 11, FT_REG), (b"dir1", 5, FT_DIR)],
    );
    builder.dir(
        5,
        2,
        &[(b"beta_hit.md", 12, FT_REG), (b"dir2", 6, FT_DIR)],
    );
    builder.dir(
        6,
        5,
        &[(b"needle_hit.bin", 13, FT_REG), (b"other.txt", 14, FT_REG)],
    );
    builder.file_direct(11, b"a");
    builder.file_direct(12, b"b");
    builder.file_direct(13, b"c");
    builder.file_direct(14, b"d");

    let volume = Volume::mount(builder.into_source()).expect("mount");

    let matches = volume.search_files(InodeNumber::ROOT, "hit").expect("search");
    let paths: Vec<&str> = matches.iter().filter_map(|m| m.full_path.as_deref()).collect();
    assert_eq!(
        paths,
        vec!["/alpha_hit.txt", "/dir1/beta_hit.md", "/dir1/dir2/needle_hit.bin"]
    );

    // Case-insensitive matching yields the same set.
    let upper = volume.search_files(InodeNumber::ROOT, "HIT").expect("search");
    assert_eq!(upper.len(), 3);

    // The deepest match resolves to the same inode by path walking.
    let deep = matches
        .iter()
        .find(|m| m.full_path.as_deref() == Some("/dir1/dir2/needle_hit.bin"))
        .expect("deep match present");
    let (ino, inode) = volume
        .resolve_path("/dir1/dir2/needle_hit.bin")
        .expect("resolve");
    assert_eq!(ino, deep.inode);
    assert_eq!(inode.size, deep.size);

    // An empty query enumerates the whole tree.
    let all = volume.search_files(InodeNumber::ROOT, "").expect("search");
    assert_eq!(all.len(), 6);
}

#[test]
fn sixty_four_bit_descriptors_mount_and_serve_files() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.enable_64bit(64);
    builder.dir(2, 2, &[(b"wide.txt", 11, FT_REG)]);
    builder.file_direct(11, b"sixty-four");

    let volume = Volume::mount(builder.into_source()).expect("mount");
    assert_eq!(volume.superblock().group_desc_size(), 64);
    assert_eq!(volume.flavor(), FsFlavor::Ext4);

    let (ino, _) = volume.resolve_path("/wide.txt").expect("resolve");
    assert_eq!(volume.read_file_to_vec(ino).expect("read"), b"sixty-four");
}

#[test]
fn symlink_targets_inline_and_block_backed() {
    let long_target: Vec<u8> = b"/very/long/target/path/"
        .iter()
        .copied()
        .cycle()
        .take(80)
        .collect();

    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"short", 7, FT_SYMLINK), (b"long", 8, FT_SYMLINK)]);
    builder.symlink(7, b"/etc/hosts");
    builder.symlink(8, &long_target);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    assert_eq!(
        volume.read_symlink(InodeNumber(7)).expect("short link"),
        b"/etc/hosts"
    );
    assert_eq!(
        volume.read_symlink(InodeNumber(8)).expect("long link"),
        long_target
    );
    assert!(matches!(
        volume.read_symlink(InodeNumber(2)),
        Err(rext::RextError::Unsupported { .. })
    ));
}

#[test]
fn lookup_is_exact_while_search_is_substring() {
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"report.txt", 11, FT_REG)]);
    builder.file_direct(11, b"x");

    let volume = Volume::mount(builder.into_source()).expect("mount");
    assert_eq!(
        volume.lookup(InodeNumber::ROOT, b"report.txt").expect("lookup"),
        Some(InodeNumber(11))
    );
    assert_eq!(volume.lookup(InodeNumber::ROOT, b"report").expect("lookup"), None);
    assert_eq!(
        volume
            .search_files(InodeNumber::ROOT, "report")
            .expect("search")
            .len(),
        1
    );
}

#[test]
fn file_backed_source_and_base_offset() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.dir(2, 2, &[(b"payload", 11, FT_REG)]);
    builder.file_direct(11, b"from a file");
    let image = builder.build();

    let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
    tmp.write_all(&image).expect("write image");
    tmp.flush().expect("flush");

    let volume = Volume::mount_path(tmp.path()).expect("mount path");
    let (ino, _) = volume.resolve_path("/payload").expect("resolve");
    assert_eq!(volume.read_file_to_vec(ino).expect("read"), b"from a file");

    // The same filesystem inside a whole-disk image at byte 8192.
    let mut disk = vec![0xEE_u8; 8192];
    disk.extend_from_slice(&image);
    let options = VolumeOptions {
        base_offset: 8192,
        ..VolumeOptions::default()
    };
    let volume = Volume::mount_with(MemByteSource::new(disk), &options).expect("mount offset");
    let (ino, _) = volume.resolve_path("/payload").expect("resolve");
    assert_eq!(volume.read_file_to_vec(ino).expect("read"), b"from a file");
}

#[test]
fn one_volume_serves_concurrent_readers() {
    let content = patterned(3000);
    let mut builder = ImageBuilder::new(1024, 128);
    builder.dir(2, 2, &[(b"shared.bin", 11, FT_REG), (b"docs", 5, FT_DIR)]);
    builder.file_direct(11, &content);
    builder.dir(5, 2, &[(b"inner.txt", 12, FT_REG)]);
    builder.file_direct(12, b"inner");

    let volume = Volume::mount(builder.into_source()).expect("mount");
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..8 {
                    let back = volume.read_file_to_vec(InodeNumber(11)).expect("read");
                    assert_eq!(back, content);
                    let entries = volume.list_directory(InodeNumber::ROOT).expect("list");
                    assert_eq!(entries.len(), 2);
                    let hits = volume.search_files(InodeNumber::ROOT, "inner").expect("search");
                    assert_eq!(hits.len(), 1);
                }
            });
        }
    });
}

#[test]
fn directory_inode_type_comes_from_the_mode() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.dir(2, 2, &[(b"sub", 5, FT_DIR)]);
    builder.dir(5, 2, &[]);

    let volume = Volume::mount(builder.into_source()).expect("mount");
    let root = volume.read_inode(InodeNumber::ROOT).expect("root inode");
    assert!(root.is_dir());
    assert_eq!(root.mode & 0xF000, S_IFDIR);
    let (_, sub) = volume.resolve_path("/sub").expect("resolve");
    assert!(sub.is_dir());
}
