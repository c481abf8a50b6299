#![forbid(unsafe_code)]
//! Block and inode allocation.
//!
//! First-fit bitmap allocators, replicated per allocation group, plus
//! the inode-table slot access that the storage engine routes through.
//!
//! ## Design
//!
//! The crate is layered:
//!
//! 1. **Bitmap** — raw bit manipulation on bitmap byte slices.
//! 2. **FsGeometry** — group layout derived once from the superblock.
//! 3. **Allocators** — per-group inode and data-block allocation with
//!    the reserved-bit rules.
//! 4. **Inode table** — read/decode and encode/write of 128-byte slots.

use lfs_block::{BlockDevice, ByteRegion};
use lfs_error::{LfsError, Result};
use lfs_ondisk::{FileType, Inode, Superblock};
use lfs_types::{
    BLOCK_SIZE, BlockId, DATA_BITMAP_OFFSET, GROUP_SPAN, GroupIndex, INODE_BITMAP_OFFSET,
    INODE_SIZE, INODE_TABLE_OFFSET, InodeId, inode_table_blocks,
};
use tracing::trace;

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u64) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u64) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u64) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Find the lowest clear bit in `[start, count)`.
///
/// Unlike a wrapping scan, this never looks below `start`; the reserved
/// bits below the search origin must stay unreachable.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u64, start: u64) -> Option<u64> {
    (start..count).find(|&idx| !bitmap_get(bitmap, idx))
}

/// Count clear bits in `[start, count)`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u64, start: u64) -> u64 {
    (start..count).filter(|&idx| !bitmap_get(bitmap, idx)).count() as u64
}

// ── Filesystem geometry ─────────────────────────────────────────────────────

/// Group layout derived from the superblock.
///
/// Pure arithmetic over the geometry — no pointer graph, no global
/// table. Global ids route to groups by integer division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsGeometry {
    pub blocks_per_group: u64,
    pub inodes_per_group: u64,
    pub total_blocks: u64,
    pub total_inodes: u64,
    pub group_count: u64,
    /// Blocks per group occupied by the inode table.
    pub inode_table_blocks: u64,
}

impl FsGeometry {
    /// Derive geometry from a mounted superblock.
    #[must_use]
    pub fn from_superblock(sb: &Superblock) -> Self {
        Self {
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            total_blocks: sb.total_blocks,
            total_inodes: sb.total_inodes,
            group_count: sb.total_blocks.div_ceil(sb.blocks_per_group),
            inode_table_blocks: inode_table_blocks(sb.inodes_per_group),
        }
    }

    /// Geometry for a device being formatted: groups of up to
    /// `GROUP_SPAN` blocks, inodes matching blocks one-to-one.
    #[must_use]
    pub fn for_device(total_blocks: u64) -> Self {
        let blocks_per_group = total_blocks.min(GROUP_SPAN);
        let group_count = total_blocks.div_ceil(blocks_per_group);
        Self {
            blocks_per_group,
            inodes_per_group: blocks_per_group,
            total_blocks,
            total_inodes: group_count * blocks_per_group,
            group_count,
            inode_table_blocks: inode_table_blocks(blocks_per_group),
        }
    }

    /// First absolute block of group `g`.
    #[must_use]
    pub fn group_base(&self, group: GroupIndex) -> BlockId {
        BlockId(group.0 * self.blocks_per_group)
    }

    /// Absolute block holding group `g`'s inode bitmap.
    #[must_use]
    pub fn inode_bitmap_block(&self, group: GroupIndex) -> BlockId {
        BlockId(self.group_base(group).0 + INODE_BITMAP_OFFSET)
    }

    /// Absolute block holding group `g`'s data-block bitmap.
    #[must_use]
    pub fn data_bitmap_block(&self, group: GroupIndex) -> BlockId {
        BlockId(self.group_base(group).0 + DATA_BITMAP_OFFSET)
    }

    /// First absolute block of group `g`'s inode table.
    #[must_use]
    pub fn inode_table_block(&self, group: GroupIndex) -> BlockId {
        BlockId(self.group_base(group).0 + INODE_TABLE_OFFSET)
    }

    /// Per-group block span reserved for metadata: the superblock slot,
    /// both bitmaps and the inode table.
    #[must_use]
    pub fn reserved_blocks_per_group(&self) -> u64 {
        INODE_TABLE_OFFSET + self.inode_table_blocks
    }

    /// Number of blocks in group `g` (the trailing group may be short).
    #[must_use]
    pub fn blocks_in_group(&self, group: GroupIndex) -> u64 {
        let base = group.0 * self.blocks_per_group;
        let remaining = self.total_blocks.saturating_sub(base);
        remaining.min(self.blocks_per_group)
    }

    /// Whether group `g` can hold any inodes or data at all. A trailing
    /// partial group too short for its own metadata region is treated
    /// as full.
    #[must_use]
    pub fn group_usable(&self, group: GroupIndex) -> bool {
        self.blocks_in_group(group) > self.reserved_blocks_per_group()
    }

    /// Group owning inode `id`.
    #[must_use]
    pub fn inode_group(&self, id: InodeId) -> GroupIndex {
        lfs_types::inode_to_group(id, self.inodes_per_group)
    }

    /// Group owning block `id`.
    #[must_use]
    pub fn block_group(&self, id: BlockId) -> GroupIndex {
        lfs_types::block_to_group(id, self.blocks_per_group)
    }

    /// Iterate all group indices in allocation-scan order.
    pub fn groups(&self) -> impl Iterator<Item = GroupIndex> {
        (0..self.group_count).map(GroupIndex)
    }
}

// ── Inode table access ──────────────────────────────────────────────────────

/// On-image location of an inode's table slot.
#[derive(Debug, Clone, Copy)]
pub struct InodeLocation {
    pub block: BlockId,
    pub byte_offset: usize,
}

/// Compute the table slot of an inode by global id.
///
/// Id 0 is the reserved null inode and is never addressable.
pub fn locate_inode(geo: &FsGeometry, id: InodeId) -> Result<InodeLocation> {
    if id.is_null() || id.0 >= geo.total_inodes {
        return Err(LfsError::OutOfRange {
            kind: "inode",
            index: id.0,
            limit: geo.total_inodes,
        });
    }
    let group = geo.inode_group(id);
    let index = lfs_types::inode_index_in_group(id, geo.inodes_per_group);
    let byte_in_table = index * INODE_SIZE as u64;
    let block = BlockId(geo.inode_table_block(group).0 + byte_in_table / BLOCK_SIZE as u64);
    let byte_offset = (byte_in_table % BLOCK_SIZE as u64) as usize;
    Ok(InodeLocation { block, byte_offset })
}

/// Read and decode the inode with global id `id`.
///
/// The decoded `id` field must agree with the slot it was read from;
/// disagreement means the table is corrupt.
pub fn read_inode<R: ByteRegion>(
    dev: &BlockDevice<R>,
    geo: &FsGeometry,
    id: InodeId,
) -> Result<Inode> {
    let loc = locate_inode(geo, id)?;
    let block = dev.block_view(loc.block)?;
    let slot = &block[loc.byte_offset..loc.byte_offset + INODE_SIZE];
    let inode = Inode::parse_from_bytes(slot).map_err(|_| LfsError::InvalidImage)?;
    if inode.file_type != FileType::Free && inode.id != id {
        return Err(LfsError::InvalidImage);
    }
    Ok(inode)
}

/// Encode and write an inode into its table slot.
pub fn write_inode<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    id: InodeId,
    inode: &Inode,
) -> Result<()> {
    let loc = locate_inode(geo, id)?;
    let block = dev.borrow_block(loc.block)?;
    inode.encode_into(&mut block[loc.byte_offset..loc.byte_offset + INODE_SIZE]);
    Ok(())
}

/// Zero an inode's table slot, returning it to the freshly-formatted
/// state.
pub fn clear_inode_slot<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    id: InodeId,
) -> Result<()> {
    let loc = locate_inode(geo, id)?;
    let block = dev.borrow_block(loc.block)?;
    block[loc.byte_offset..loc.byte_offset + INODE_SIZE].fill(0);
    Ok(())
}

// ── Inode allocation ────────────────────────────────────────────────────────

/// Allocate an inode from group `group`.
///
/// First-fit over the group's inode bitmap. Group 0 permanently skips
/// bit 0 so that global inode id 0 stays the null sentinel. The fresh
/// slot is zeroed and its `id` field written before the id is returned.
/// `None` means the group is full.
pub fn allocate_inode<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    group: GroupIndex,
) -> Result<Option<InodeId>> {
    if !geo.group_usable(group) {
        return Ok(None);
    }

    let first = u64::from(group.0 == 0);
    let local = {
        let bitmap = dev.borrow_block(geo.inode_bitmap_block(group))?;
        let Some(local) = bitmap_find_free(bitmap, geo.inodes_per_group, first) else {
            return Ok(None);
        };
        bitmap_set(bitmap, local);
        local
    };

    let id = InodeId(group.0 * geo.inodes_per_group + local);
    let loc = locate_inode(geo, id)?;
    let block = dev.borrow_block(loc.block)?;
    let slot = &mut block[loc.byte_offset..loc.byte_offset + INODE_SIZE];
    slot.fill(0);
    lfs_types::write_le_u64(slot, 0, id.0);

    trace!(target: "lfs::alloc", group = group.0, inode = id.0, "inode allocated");
    Ok(Some(id))
}

/// Release an inode's bitmap bit.
///
/// The caller has already freed the inode's blocks and zeroed its slot.
pub fn free_inode<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    id: InodeId,
) -> Result<()> {
    // Reuse the table-slot range check; it rejects id 0 and ids past the
    // image.
    locate_inode(geo, id)?;
    let group = geo.inode_group(id);
    let local = lfs_types::inode_index_in_group(id, geo.inodes_per_group);
    let bitmap = dev.borrow_block(geo.inode_bitmap_block(group))?;
    bitmap_clear(bitmap, local);
    trace!(target: "lfs::alloc", group = group.0, inode = id.0, "inode freed");
    Ok(())
}

// ── Data-block allocation ───────────────────────────────────────────────────

/// Allocate a data block from group `group`.
///
/// The scan starts past the group's metadata region (superblock slot,
/// bitmaps, inode table), so those blocks are never handed out. The
/// block content is zeroed before the id is returned. `None` means the
/// group has no free data blocks.
pub fn allocate_block<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    group: GroupIndex,
) -> Result<Option<BlockId>> {
    if !geo.group_usable(group) {
        return Ok(None);
    }

    let span = geo.blocks_in_group(group);
    let reserved = geo.reserved_blocks_per_group();
    let local = {
        let bitmap = dev.borrow_block(geo.data_bitmap_block(group))?;
        let Some(local) = bitmap_find_free(bitmap, span, reserved) else {
            return Ok(None);
        };
        bitmap_set(bitmap, local);
        local
    };

    let id = BlockId(group.0 * geo.blocks_per_group + local);
    dev.borrow_block(id)?.fill(0);

    trace!(target: "lfs::alloc", group = group.0, block = id.0, "block allocated");
    Ok(Some(id))
}

/// Release a data block's bitmap bit.
///
/// Freeing a block inside a metadata region is rejected: no inode can
/// legitimately reference one.
pub fn free_block<R: ByteRegion>(
    dev: &mut BlockDevice<R>,
    geo: &FsGeometry,
    id: BlockId,
) -> Result<()> {
    let local = lfs_types::block_index_in_group(id, geo.blocks_per_group);
    if id.0 >= geo.total_blocks || local < geo.reserved_blocks_per_group() {
        return Err(LfsError::OutOfRange {
            kind: "data block",
            index: id.0,
            limit: geo.total_blocks,
        });
    }
    let group = geo.block_group(id);
    let bitmap = dev.borrow_block(geo.data_bitmap_block(group))?;
    bitmap_clear(bitmap, local);
    trace!(target: "lfs::alloc", group = group.0, block = id.0, "block freed");
    Ok(())
}

// ── Free-space accounting ───────────────────────────────────────────────────

/// Count free inodes across the whole image.
pub fn free_inode_count<R: ByteRegion>(dev: &BlockDevice<R>, geo: &FsGeometry) -> Result<u64> {
    let mut free = 0;
    for group in geo.groups() {
        if !geo.group_usable(group) {
            continue;
        }
        let first = u64::from(group.0 == 0);
        let bitmap = dev.block_view(geo.inode_bitmap_block(group))?;
        free += bitmap_count_free(bitmap, geo.inodes_per_group, first);
    }
    Ok(free)
}

/// Count free data blocks across the whole image.
pub fn free_block_count<R: ByteRegion>(dev: &BlockDevice<R>, geo: &FsGeometry) -> Result<u64> {
    let mut free = 0;
    for group in geo.groups() {
        if !geo.group_usable(group) {
            continue;
        }
        let bitmap = dev.block_view(geo.data_bitmap_block(group))?;
        free += bitmap_count_free(
            bitmap,
            geo.blocks_in_group(group),
            geo.reserved_blocks_per_group(),
        );
    }
    Ok(free)
}
