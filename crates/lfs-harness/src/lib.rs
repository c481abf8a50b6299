#![forbid(unsafe_code)]
//! Conformance tooling for LatticeFS.
//!
//! Image builders, deterministic data streams and a whole-image
//! consistency checker. The checker re-derives the set of referenced
//! blocks and live inodes by walking the namespace with the on-disk
//! codec directly — independently of the engine's own scanning — and
//! compares that against every group bitmap.

use anyhow::{Context, Result, bail, ensure};
use lfs_alloc::{bitmap_get, read_inode};
use lfs_block::{BlockDevice, ByteRegion};
use lfs_core::LatticeFs;
use lfs_ondisk::{DirEntry, FileType, dirent_slot_range};
use lfs_types::{BLOCK_SIZE, BlockId, ENTRIES_PER_BLOCK, InodeId};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::BTreeSet;

/// Format a fresh in-memory filesystem of `bytes` capacity.
#[must_use]
pub fn fresh_fs(bytes: usize) -> LatticeFs<Vec<u8>> {
    let dev = BlockDevice::new(vec![0_u8; bytes]).expect("aligned capacity");
    LatticeFs::format(dev).expect("format")
}

/// Tear the engine down and mount a new one over the same region,
/// simulating a shutdown/startup cycle.
#[must_use]
pub fn remount(fs: LatticeFs<Vec<u8>>) -> LatticeFs<Vec<u8>> {
    let region = fs.into_device().into_region();
    LatticeFs::mount(BlockDevice::new(region).expect("region intact")).expect("mount")
}

/// Deterministic pseudo-random byte stream.
#[must_use]
pub fn prng_stream(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0_u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// The allocation state of an image as its bitmaps tell it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub used_inodes: BTreeSet<u64>,
    pub used_blocks: BTreeSet<u64>,
}

/// Collect every set bitmap bit across all groups.
pub fn usage_snapshot<R: ByteRegion>(fs: &LatticeFs<R>) -> Result<UsageSnapshot> {
    let geo = fs.geometry();
    let dev = fs.device();

    let mut used_inodes = BTreeSet::new();
    let mut used_blocks = BTreeSet::new();
    for group in geo.groups() {
        if !geo.group_usable(group) {
            continue;
        }
        let inode_bm = dev.block_view(geo.inode_bitmap_block(group))?;
        for local in 0..geo.inodes_per_group {
            if bitmap_get(inode_bm, local) {
                used_inodes.insert(group.0 * geo.inodes_per_group + local);
            }
        }
        let data_bm = dev.block_view(geo.data_bitmap_block(group))?;
        for local in 0..geo.blocks_in_group(group) {
            if bitmap_get(data_bm, local) {
                used_blocks.insert(group.0 * geo.blocks_per_group + local);
            }
        }
    }
    Ok(UsageSnapshot {
        used_inodes,
        used_blocks,
    })
}

/// Walk the namespace and verify the core allocation invariants:
///
/// 1. a data-block bit is set iff exactly one reachable inode
///    references that block;
/// 2. an inode bit is set iff the slot's `file_type` is not `FREE`,
///    and every such inode is reachable from the root;
/// 3. inode id 0 stays reserved and no metadata block bit is ever set.
pub fn check_consistency<R: ByteRegion>(fs: &LatticeFs<R>) -> Result<()> {
    let geo = fs.geometry();
    let dev = fs.device();
    let root = fs.superblock().root_inode;
    ensure!(!root.is_null(), "superblock has no root inode");

    let mut live_inodes = BTreeSet::new();
    let mut referenced = BTreeSet::new();
    walk(dev, fs, root, &mut live_inodes, &mut referenced)?;

    let usage = usage_snapshot(fs)?;

    // Invariant 3: the null id and the metadata regions.
    ensure!(
        !usage.used_inodes.contains(&0),
        "reserved inode id 0 is marked allocated"
    );
    let reserved = geo.reserved_blocks_per_group();
    for block in &usage.used_blocks {
        ensure!(
            block % geo.blocks_per_group >= reserved,
            "metadata block {block} is marked allocated"
        );
    }

    // Invariant 1: bitmap bits and block references agree.
    for block in &referenced {
        ensure!(
            usage.used_blocks.contains(block),
            "block {block} is referenced but its bitmap bit is clear"
        );
    }
    for block in &usage.used_blocks {
        ensure!(
            referenced.contains(block),
            "block {block} is marked allocated but nothing references it"
        );
    }

    // Invariant 2: inode bits, file types and reachability agree.
    for id in &live_inodes {
        ensure!(
            usage.used_inodes.contains(id),
            "inode {id} is reachable but its bitmap bit is clear"
        );
    }
    for id in &usage.used_inodes {
        let inode = read_inode(dev, geo, InodeId(*id))
            .with_context(|| format!("reading allocated inode {id}"))?;
        ensure!(
            inode.file_type != FileType::Free,
            "inode {id} is marked allocated but its slot is free"
        );
        ensure!(
            live_inodes.contains(id),
            "inode {id} is marked allocated but unreachable from the root"
        );
    }

    Ok(())
}

/// Depth-first namespace walk using the on-disk codec directly.
fn walk<R: ByteRegion>(
    dev: &BlockDevice<R>,
    fs: &LatticeFs<R>,
    id: InodeId,
    live_inodes: &mut BTreeSet<u64>,
    referenced: &mut BTreeSet<u64>,
) -> Result<()> {
    if !live_inodes.insert(id.0) {
        bail!("inode {id} is referenced by more than one entry");
    }
    let inode = read_inode(dev, fs.geometry(), id)?;

    match inode.file_type {
        FileType::Free => bail!("directory entry references free inode {id}"),
        FileType::File => {
            for block in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
                track_block(referenced, *block)?;
            }
        }
        FileType::Directory => {
            for block in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
                track_block(referenced, *block)?;
                let data = dev.block_view(*block)?;
                for slot in 0..ENTRIES_PER_BLOCK {
                    let entry = DirEntry::parse_from_bytes(&data[dirent_slot_range(slot)])
                        .context("undecodable directory entry")?;
                    if let Some(entry) = entry {
                        walk(dev, fs, entry.inode_id, live_inodes, referenced)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn track_block(referenced: &mut BTreeSet<u64>, block: BlockId) -> Result<()> {
    if !referenced.insert(block.0) {
        bail!("block {block} is referenced by more than one inode");
    }
    Ok(())
}

/// Capacity helper: a 16 MiB image, the size the conformance scenarios
/// use.
#[must_use]
pub fn sixteen_mib() -> usize {
    16 * 1024 * 1024
}

/// A deliberately tiny image (64 blocks, one group) for allocator edge
/// cases.
#[must_use]
pub fn tiny_image() -> usize {
    64 * BLOCK_SIZE
}
