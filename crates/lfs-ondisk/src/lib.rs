#![forbid(unsafe_code)]
//! On-image format parsing and encoding for LatticeFS structures.
//!
//! Pure codec crate — no I/O, no side effects. Decodes byte slices into
//! typed superblock, inode and directory-entry records and encodes them
//! back at the same fixed little-endian offsets. Every record occupies a
//! fixed-size slot so the storage engine can address slots by pure
//! arithmetic.

use lfs_types::{
    BlockId, DIR_ENTRY_SIZE, IMAGE_MAGIC, INODE_SIZE, InodeId, MAX_NAME_LEN, NUM_DIRECT_BLOCKS,
    ParseError, read_le_u16, read_le_u32, read_le_u64, write_le_u16, write_le_u32, write_le_u64,
};
use serde::{Deserialize, Serialize};

// ── Field offsets ───────────────────────────────────────────────────────────

const SB_MAGIC: usize = 0;
const SB_TOTAL_INODES: usize = 8;
const SB_TOTAL_BLOCKS: usize = 16;
const SB_INODES_PER_GROUP: usize = 24;
const SB_BLOCKS_PER_GROUP: usize = 32;
const SB_ROOT_INODE: usize = 40;

const INODE_ID: usize = 0;
const INODE_FILE_TYPE: usize = 8;
const INODE_FILE_SIZE: usize = 12;
const INODE_UID: usize = 20;
const INODE_GID: usize = 22;
const INODE_PERMISSIONS: usize = 24;
const INODE_DIRECT_BLOCKS: usize = 32;

const DIRENT_INODE_ID: usize = 0;
const DIRENT_NAME_LEN: usize = 8;
const DIRENT_NAME: usize = 9;

// ── File type ───────────────────────────────────────────────────────────────

/// Kind of object an inode describes. `Free` marks an unallocated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Free,
    File,
    Directory,
}

impl FileType {
    /// Decode the on-image discriminant.
    pub fn from_raw(raw: u32) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            _ => Err(ParseError::InvalidField {
                field: "file_type",
                reason: "unknown discriminant",
            }),
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Free => 0,
            Self::File => 1,
            Self::Directory => 2,
        }
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Global metadata record stored at the start of block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub total_inodes: u64,
    pub total_blocks: u64,
    pub inodes_per_group: u64,
    pub blocks_per_group: u64,
    /// Zero on a freshly formatted image until the root is allocated.
    pub root_inode: InodeId,
}

impl Superblock {
    /// Decode from the start of a block-0 byte slice, verifying the
    /// magic.
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u64(data, SB_MAGIC)?;
        if magic != IMAGE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: IMAGE_MAGIC,
                actual: magic,
            });
        }

        let total_inodes = read_le_u64(data, SB_TOTAL_INODES)?;
        let total_blocks = read_le_u64(data, SB_TOTAL_BLOCKS)?;
        let inodes_per_group = read_le_u64(data, SB_INODES_PER_GROUP)?;
        let blocks_per_group = read_le_u64(data, SB_BLOCKS_PER_GROUP)?;
        if blocks_per_group == 0 || inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "blocks_per_group",
                reason: "must be non-zero",
            });
        }

        Ok(Self {
            total_inodes,
            total_blocks,
            inodes_per_group,
            blocks_per_group,
            root_inode: InodeId(read_le_u64(data, SB_ROOT_INODE)?),
        })
    }

    /// Encode into the first `SUPERBLOCK_SIZE` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) {
        write_le_u64(out, SB_MAGIC, IMAGE_MAGIC);
        write_le_u64(out, SB_TOTAL_INODES, self.total_inodes);
        write_le_u64(out, SB_TOTAL_BLOCKS, self.total_blocks);
        write_le_u64(out, SB_INODES_PER_GROUP, self.inodes_per_group);
        write_le_u64(out, SB_BLOCKS_PER_GROUP, self.blocks_per_group);
        write_le_u64(out, SB_ROOT_INODE, self.root_inode.0);
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// One inode-table slot: the metadata of a single file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Redundant with table position; used for self-checks and group
    /// routing.
    pub id: InodeId,
    pub file_type: FileType,
    /// Content length in bytes for files; `DIR_ENTRY_SIZE` times the
    /// live entry count for directories.
    pub file_size: u64,
    pub uid: u16,
    pub gid: u16,
    /// Nine low bits, `rwxrwxrwx` (owner, group, other).
    pub permissions: u16,
    /// Global block ids; 0 means unallocated.
    pub direct_blocks: [BlockId; NUM_DIRECT_BLOCKS],
}

impl Inode {
    /// A free slot, as the allocator leaves it after zeroing.
    #[must_use]
    pub fn free(id: InodeId) -> Self {
        Self {
            id,
            file_type: FileType::Free,
            file_size: 0,
            uid: 0,
            gid: 0,
            permissions: 0,
            direct_blocks: [BlockId(0); NUM_DIRECT_BLOCKS],
        }
    }

    /// Decode from a 128-byte table slot.
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let id = InodeId(read_le_u64(data, INODE_ID)?);
        let file_type = FileType::from_raw(read_le_u32(data, INODE_FILE_TYPE)?)?;
        let file_size = read_le_u64(data, INODE_FILE_SIZE)?;
        let uid = read_le_u16(data, INODE_UID)?;
        let gid = read_le_u16(data, INODE_GID)?;
        let permissions = read_le_u16(data, INODE_PERMISSIONS)?;

        let mut direct_blocks = [BlockId(0); NUM_DIRECT_BLOCKS];
        for (i, slot) in direct_blocks.iter_mut().enumerate() {
            *slot = BlockId(read_le_u64(data, INODE_DIRECT_BLOCKS + i * 8)?);
        }

        Ok(Self {
            id,
            file_type,
            file_size,
            uid,
            gid,
            permissions,
            direct_blocks,
        })
    }

    /// Encode into a 128-byte table slot, zeroing the reserved bytes.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[..INODE_SIZE].fill(0);
        write_le_u64(out, INODE_ID, self.id.0);
        write_le_u32(out, INODE_FILE_TYPE, self.file_type.to_raw());
        write_le_u64(out, INODE_FILE_SIZE, self.file_size);
        write_le_u16(out, INODE_UID, self.uid);
        write_le_u16(out, INODE_GID, self.gid);
        write_le_u16(out, INODE_PERMISSIONS, self.permissions);
        for (i, slot) in self.direct_blocks.iter().enumerate() {
            write_le_u64(out, INODE_DIRECT_BLOCKS + i * 8, slot.0);
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }
}

// ── Directory entry ─────────────────────────────────────────────────────────

/// A (name, inode id) record inside a directory's data blocks.
///
/// A slot whose `inode_id` is 0 is free — either never used or a
/// tombstone from a prior removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode_id: InodeId,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Build an entry, validating the name length.
    pub fn new(inode_id: InodeId, name: &[u8]) -> Result<Self, ParseError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "must be 1..=254 bytes",
            });
        }
        Ok(Self {
            inode_id,
            name: name.to_vec(),
        })
    }

    /// Decode from a 264-byte slot. Returns `None` for a free slot.
    pub fn parse_from_bytes(data: &[u8]) -> Result<Option<Self>, ParseError> {
        let inode_id = InodeId(read_le_u64(data, DIRENT_INODE_ID)?);
        if inode_id.is_null() {
            return Ok(None);
        }
        let name_len = *data.get(DIRENT_NAME_LEN).ok_or(ParseError::InsufficientData {
            needed: 1,
            offset: DIRENT_NAME_LEN,
            actual: 0,
        })? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "name_len",
                reason: "exceeds the name field",
            });
        }
        let name = data
            .get(DIRENT_NAME..DIRENT_NAME + name_len)
            .ok_or(ParseError::InsufficientData {
                needed: name_len,
                offset: DIRENT_NAME,
                actual: data.len().saturating_sub(DIRENT_NAME),
            })?
            .to_vec();
        Ok(Some(Self { inode_id, name }))
    }

    /// Encode into a 264-byte slot, NUL-padding the name field.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[..DIR_ENTRY_SIZE].fill(0);
        write_le_u64(out, DIRENT_INODE_ID, self.inode_id.0);
        #[allow(clippy::cast_possible_truncation)] // validated in `new`
        {
            out[DIRENT_NAME_LEN] = self.name.len() as u8;
        }
        out[DIRENT_NAME..DIRENT_NAME + self.name.len()].copy_from_slice(&self.name);
    }

    /// Entry name as lossy UTF-8, for display.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Byte range of directory-entry slot `slot` within a block.
#[must_use]
pub fn dirent_slot_range(slot: usize) -> std::ops::Range<usize> {
    let start = slot * DIR_ENTRY_SIZE;
    start..start + DIR_ENTRY_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfs_types::{BLOCK_SIZE, ENTRIES_PER_BLOCK, SUPERBLOCK_SIZE};

    #[test]
    fn superblock_round_trip() {
        let sb = Superblock {
            total_inodes: 8192,
            total_blocks: 8192,
            inodes_per_group: 4096,
            blocks_per_group: 4096,
            root_inode: InodeId::ROOT,
        };
        let mut buf = [0_u8; BLOCK_SIZE];
        sb.encode_into(&mut buf);

        let parsed = Superblock::parse_from_bytes(&buf).expect("parse");
        assert_eq!(parsed, sb);
        // The rest of the block stays zero.
        assert!(buf[SUPERBLOCK_SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn superblock_rejects_bad_magic() {
        let buf = [0_u8; BLOCK_SIZE];
        let err = Superblock::parse_from_bytes(&buf).unwrap_err();
        assert!(matches!(err, ParseError::InvalidMagic { .. }));
    }

    #[test]
    fn fresh_superblock_has_null_root() {
        let sb = Superblock {
            total_inodes: 100,
            total_blocks: 100,
            inodes_per_group: 100,
            blocks_per_group: 100,
            root_inode: InodeId::NULL,
        };
        let mut buf = [0_u8; BLOCK_SIZE];
        sb.encode_into(&mut buf);
        let parsed = Superblock::parse_from_bytes(&buf).unwrap();
        assert!(parsed.root_inode.is_null());
    }

    #[test]
    fn inode_round_trip() {
        let mut inode = Inode::free(InodeId(42));
        inode.file_type = FileType::File;
        inode.file_size = 12345;
        inode.uid = 100;
        inode.gid = 200;
        inode.permissions = 0o644;
        inode.direct_blocks[0] = BlockId(131);
        inode.direct_blocks[11] = BlockId(4095);

        let mut slot = [0_u8; INODE_SIZE];
        inode.encode_into(&mut slot);
        let parsed = Inode::parse_from_bytes(&slot).expect("parse");
        assert_eq!(parsed, inode);
    }

    #[test]
    fn zeroed_slot_parses_as_free() {
        let slot = [0_u8; INODE_SIZE];
        let parsed = Inode::parse_from_bytes(&slot).expect("parse");
        assert_eq!(parsed.file_type, FileType::Free);
        assert_eq!(parsed.id, InodeId::NULL);
        assert!(parsed.direct_blocks.iter().all(|b| b.0 == 0));
    }

    #[test]
    fn inode_rejects_unknown_type() {
        let mut slot = [0_u8; INODE_SIZE];
        slot[INODE_FILE_TYPE] = 9;
        assert!(Inode::parse_from_bytes(&slot).is_err());
    }

    #[test]
    fn dirent_round_trip() {
        let entry = DirEntry::new(InodeId(7), b"notes.txt").expect("entry");
        let mut slot = [0_u8; DIR_ENTRY_SIZE];
        entry.encode_into(&mut slot);

        let parsed = DirEntry::parse_from_bytes(&slot)
            .expect("parse")
            .expect("live entry");
        assert_eq!(parsed.inode_id, InodeId(7));
        assert_eq!(parsed.name, b"notes.txt");
        assert_eq!(parsed.name_str(), "notes.txt");
    }

    #[test]
    fn free_slot_parses_as_none() {
        let slot = [0_u8; DIR_ENTRY_SIZE];
        assert_eq!(DirEntry::parse_from_bytes(&slot).expect("parse"), None);
    }

    #[test]
    fn dirent_name_length_limits() {
        assert!(DirEntry::new(InodeId(1), b"").is_err());
        assert!(DirEntry::new(InodeId(1), &[b'a'; 254]).is_ok());
        assert!(DirEntry::new(InodeId(1), &[b'a'; 255]).is_err());
    }

    #[test]
    fn slot_ranges_tile_a_block() {
        let last = dirent_slot_range(ENTRIES_PER_BLOCK - 1);
        assert!(last.end <= BLOCK_SIZE);
        assert_eq!(dirent_slot_range(0), 0..DIR_ENTRY_SIZE);
        assert_eq!(dirent_slot_range(1).start, DIR_ENTRY_SIZE);
    }
}
