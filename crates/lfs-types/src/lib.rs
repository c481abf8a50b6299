#![forbid(unsafe_code)]
//! Core identifiers and byte-level helpers for LatticeFS.
//!
//! Unit-carrying newtypes for block, inode and group numbers, the
//! on-image constants shared by every layer, little-endian field
//! helpers, and the group-routing arithmetic. No I/O happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── On-image constants ──────────────────────────────────────────────────────

/// Unit of device I/O, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Identifies a valid LatticeFS image (stored in the first 8 bytes of
/// block 0).
pub const IMAGE_MAGIC: u64 = 0xF551_3001;

/// Encoded size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 48;

/// Size of one inode slot in the inode table.
pub const INODE_SIZE: usize = 128;

/// Number of direct block pointers per inode.
pub const NUM_DIRECT_BLOCKS: usize = 12;

/// Largest file content the direct pointers can address.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT_BLOCKS * BLOCK_SIZE;

/// Encoded size of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 264;

/// Directory entry slots per data block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 254;

/// Blocks (and inodes) per full allocation group; smaller images get a
/// single group spanning the whole device.
pub const GROUP_SPAN: u64 = 4096;

/// Block offset of the inode bitmap within its group.
pub const INODE_BITMAP_OFFSET: u64 = 1;
/// Block offset of the data-block bitmap within its group.
pub const DATA_BITMAP_OFFSET: u64 = 2;
/// Block offset of the first inode-table block within its group.
pub const INODE_TABLE_OFFSET: u64 = 3;

// ── Permission bits ─────────────────────────────────────────────────────────

/// Read bit of a permission triplet.
pub const MODE_READ: u16 = 0o4;
/// Write bit of a permission triplet.
pub const MODE_WRITE: u16 = 0o2;
/// Execute bit of a permission triplet.
pub const MODE_EXEC: u16 = 0o1;

/// Default permissions for a freshly created directory.
pub const DEFAULT_DIR_PERMS: u16 = 0o755;
/// Default permissions for a freshly created file.
pub const DEFAULT_FILE_PERMS: u16 = 0o644;

// ── Identifier newtypes ─────────────────────────────────────────────────────

/// Global block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// Global inode number. Id 0 is reserved as the null inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeId(pub u64);

/// Allocation group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupIndex(pub u64);

impl InodeId {
    /// The reserved null inode; directory entries use it to mark free
    /// slots.
    pub const NULL: Self = Self(0);

    /// The root directory is the first allocation on a fresh image.
    pub const ROOT: Self = Self(1);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Group routing arithmetic ────────────────────────────────────────────────

/// Group owning a given inode.
#[must_use]
pub fn inode_to_group(ino: InodeId, inodes_per_group: u64) -> GroupIndex {
    GroupIndex(ino.0 / inodes_per_group)
}

/// Index of an inode within its group's table.
#[must_use]
pub fn inode_index_in_group(ino: InodeId, inodes_per_group: u64) -> u64 {
    ino.0 % inodes_per_group
}

/// Group owning a given block.
#[must_use]
pub fn block_to_group(block: BlockId, blocks_per_group: u64) -> GroupIndex {
    GroupIndex(block.0 / blocks_per_group)
}

/// Index of a block within its group.
#[must_use]
pub fn block_index_in_group(block: BlockId, blocks_per_group: u64) -> u64 {
    block.0 % blocks_per_group
}

/// First absolute block of a group.
#[must_use]
pub fn group_first_block(group: GroupIndex, blocks_per_group: u64) -> BlockId {
    BlockId(group.0 * blocks_per_group)
}

/// Blocks needed to hold one group's inode table.
#[must_use]
pub fn inode_table_blocks(inodes_per_group: u64) -> u64 {
    (inodes_per_group * INODE_SIZE as u64).div_ceil(BLOCK_SIZE as u64)
}

// ── Parse error ─────────────────────────────────────────────────────────────

/// Structural fault while decoding an on-image record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Byte-slice helpers ──────────────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
