//! Directory-block scanning.
//!
//! A directory data block is a dense array of fifteen 264-byte entry
//! slots. A slot whose inode id is zero is free — never used, or a
//! tombstone left by a removal and reusable by a later insert.

use lfs_error::{LfsError, Result};
use lfs_ondisk::{DirEntry, dirent_slot_range};
use lfs_types::ENTRIES_PER_BLOCK;

/// Decode every live entry in a directory block, with its slot index.
pub fn live_entries(block: &[u8]) -> Result<Vec<(usize, DirEntry)>> {
    let mut entries = Vec::new();
    for slot in 0..ENTRIES_PER_BLOCK {
        let raw = &block[dirent_slot_range(slot)];
        if let Some(entry) = DirEntry::parse_from_bytes(raw).map_err(|_| LfsError::InvalidImage)? {
            entries.push((slot, entry));
        }
    }
    Ok(entries)
}

/// Find the entry named `name` in a directory block.
pub fn find_named(block: &[u8], name: &[u8]) -> Result<Option<(usize, DirEntry)>> {
    for slot in 0..ENTRIES_PER_BLOCK {
        let raw = &block[dirent_slot_range(slot)];
        if let Some(entry) = DirEntry::parse_from_bytes(raw).map_err(|_| LfsError::InvalidImage)? {
            if entry.name == name {
                return Ok(Some((slot, entry)));
            }
        }
    }
    Ok(None)
}

/// First free slot in a directory block, if any.
#[must_use]
pub fn find_free_slot(block: &[u8]) -> Option<usize> {
    (0..ENTRIES_PER_BLOCK).find(|&slot| {
        let raw = &block[dirent_slot_range(slot)];
        raw[..8] == [0_u8; 8]
    })
}
