#![forbid(unsafe_code)]
//! LatticeFS storage engine.
//!
//! `LatticeFs` owns the block device and performs every namespace and
//! file operation directly against the image: format/mount lifecycle,
//! path resolution across allocation groups, directory entry
//! management, file read/write with block-level growth and shrink,
//! recursive deletion, and the ownership checks consulted on every
//! call.
//!
//! The engine is single-threaded; each public operation runs to
//! completion or to an error, and an error never leaves a partial
//! mutation behind.

mod dir;
mod paths;
mod perm;

pub use paths::tokenize;
pub use perm::{Credentials, check_access};

pub use lfs_error::{LfsError, Result};

use lfs_alloc::FsGeometry;
use lfs_block::{BlockDevice, ByteRegion};
use lfs_ondisk::{DirEntry, FileType, Inode, Superblock, dirent_slot_range};
use lfs_types::{
    BLOCK_SIZE, BlockId, DEFAULT_DIR_PERMS, DEFAULT_FILE_PERMS, DIR_ENTRY_SIZE, GroupIndex,
    InodeId, MAX_FILE_SIZE, MAX_NAME_LEN, MODE_READ, MODE_WRITE, NUM_DIRECT_BLOCKS,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirRecord {
    pub name: String,
    pub uid: u16,
    pub gid: u16,
    pub permissions: u16,
    pub is_directory: bool,
}

/// The storage engine: a mounted (or freshly formatted) LatticeFS
/// image.
#[derive(Debug)]
pub struct LatticeFs<R: ByteRegion> {
    dev: BlockDevice<R>,
    sb: Superblock,
    geo: FsGeometry,
    cred: Credentials,
}

impl<R: ByteRegion> LatticeFs<R> {
    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Initialize a device as an empty filesystem.
    ///
    /// Zeroes the whole image, lays down the superblock, allocates the
    /// root directory (the first inode, id 1) and commits the
    /// superblock again with the root id filled in.
    pub fn format(mut dev: BlockDevice<R>) -> Result<Self> {
        dev.wipe();

        let geo = FsGeometry::for_device(dev.block_count());
        let mut sb = Superblock {
            total_inodes: geo.total_inodes,
            total_blocks: geo.total_blocks,
            inodes_per_group: geo.inodes_per_group,
            blocks_per_group: geo.blocks_per_group,
            root_inode: InodeId::NULL,
        };
        write_superblock(&mut dev, &sb)?;

        let root = lfs_alloc::allocate_inode(&mut dev, &geo, GroupIndex(0))?
            .ok_or(LfsError::NoSpace)?;
        let mut inode = Inode::free(root);
        inode.file_type = FileType::Directory;
        inode.permissions = DEFAULT_DIR_PERMS;
        lfs_alloc::write_inode(&mut dev, &geo, root, &inode)?;

        sb.root_inode = root;
        write_superblock(&mut dev, &sb)?;

        debug!(
            target: "lfs::fs",
            blocks = geo.total_blocks,
            groups = geo.group_count,
            root = root.0,
            "image formatted"
        );
        Ok(Self {
            dev,
            sb,
            geo,
            cred: Credentials::ROOT,
        })
    }

    /// Recover engine state from an already-formatted image.
    pub fn mount(dev: BlockDevice<R>) -> Result<Self> {
        let sb = Superblock::parse_from_bytes(dev.block_view(BlockId(0))?)
            .map_err(|_| LfsError::InvalidImage)?;
        if sb.total_blocks != dev.block_count() || sb.root_inode.is_null() {
            return Err(LfsError::InvalidImage);
        }
        let geo = FsGeometry::from_superblock(&sb);

        debug!(
            target: "lfs::fs",
            blocks = geo.total_blocks,
            groups = geo.group_count,
            root = sb.root_inode.0,
            "image mounted"
        );
        Ok(Self {
            dev,
            sb,
            geo,
            cred: Credentials::ROOT,
        })
    }

    /// Assume an identity for subsequent operations.
    pub fn login(&mut self, uid: u16, gid: u16) {
        self.cred = Credentials::new(uid, gid);
        trace!(target: "lfs::fs", uid, gid, "login");
    }

    /// Return to the root identity.
    pub fn logout(&mut self) {
        self.cred = Credentials::ROOT;
        trace!(target: "lfs::fs", "logout");
    }

    #[must_use]
    pub fn credentials(&self) -> Credentials {
        self.cred
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn geometry(&self) -> &FsGeometry {
        &self.geo
    }

    #[must_use]
    pub fn device(&self) -> &BlockDevice<R> {
        &self.dev
    }

    /// Hand the device back, e.g. for flushing the region or mounting a
    /// fresh engine over the same image.
    #[must_use]
    pub fn into_device(self) -> BlockDevice<R> {
        self.dev
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Create an empty file at `path`.
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        self.create_entry(path, FileType::File)
    }

    /// Create an empty directory at `path`.
    pub fn create_dir(&mut self, path: &str) -> Result<()> {
        self.create_entry(path, FileType::Directory)
    }

    fn create_entry(&mut self, path: &str, file_type: FileType) -> Result<()> {
        let tokens = paths::tokenize(path);
        let Some((&name, _)) = tokens.split_last() else {
            return Err(LfsError::InvalidArgument("path names no entry"));
        };
        if name.len() > MAX_NAME_LEN {
            return Err(LfsError::InvalidArgument("name longer than 254 bytes"));
        }

        let parent_id = self.resolve_parent(&tokens)?;
        let parent = self.inode_for(parent_id)?;
        if !parent.is_directory() {
            return Err(LfsError::NotADirectory);
        }
        if !check_access(&parent, self.cred, MODE_WRITE) {
            return Err(LfsError::PermissionDenied);
        }
        if !self.find_in_dir(&parent, name.as_bytes())?.is_null() {
            return Err(LfsError::AlreadyExists);
        }

        let new_id = self.allocate_inode_any_group()?;
        let mut inode = Inode::free(new_id);
        inode.file_type = file_type;
        inode.uid = self.cred.uid;
        inode.gid = self.cred.gid;
        inode.permissions = match file_type {
            FileType::Directory => DEFAULT_DIR_PERMS,
            _ => DEFAULT_FILE_PERMS,
        };
        lfs_alloc::write_inode(&mut self.dev, &self.geo, new_id, &inode)?;

        if let Err(err) = self.add_entry(parent_id, new_id, name.as_bytes()) {
            // Undo the allocation so the failed create leaves no trace.
            self.release_inode(new_id)?;
            return Err(err);
        }

        debug!(
            target: "lfs::fs",
            path,
            inode = new_id.0,
            kind = ?file_type,
            "entry created"
        );
        Ok(())
    }

    /// Link `new_id` under `parent_id` as `name`.
    ///
    /// Directory growth draws blocks from the parent's own group; a
    /// directory whose twelve blocks hold only live entries is full.
    fn add_entry(&mut self, parent_id: InodeId, new_id: InodeId, name: &[u8]) -> Result<()> {
        let entry =
            DirEntry::new(new_id, name).map_err(|_| LfsError::InvalidArgument("bad entry name"))?;
        let mut parent = self.inode_for(parent_id)?;

        for i in 0..NUM_DIRECT_BLOCKS {
            let block_id = if parent.direct_blocks[i].0 == 0 {
                let group = self.geo.inode_group(parent_id);
                let fresh = lfs_alloc::allocate_block(&mut self.dev, &self.geo, group)?
                    .ok_or(LfsError::NoSpace)?;
                parent.direct_blocks[i] = fresh;
                fresh
            } else {
                parent.direct_blocks[i]
            };

            let slot = dir::find_free_slot(self.dev.block_view(block_id)?);
            if let Some(slot) = slot {
                let block = self.dev.borrow_block(block_id)?;
                entry.encode_into(&mut block[dirent_slot_range(slot)]);
                parent.file_size += DIR_ENTRY_SIZE as u64;
                lfs_alloc::write_inode(&mut self.dev, &self.geo, parent_id, &parent)?;
                return Ok(());
            }
        }

        Err(LfsError::DirectoryFull)
    }

    // ── File I/O ────────────────────────────────────────────────────────

    /// Replace the content of the file at `path` with `bytes`.
    ///
    /// Overwrite is total: blocks the new length no longer needs are
    /// freed, missing blocks are allocated (all of them up front, so a
    /// full image fails without touching the file).
    pub fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        let tokens = paths::tokenize(path);
        let id = self.resolve_path(&tokens)?;
        let mut inode = self.inode_for(id)?;
        if !inode.is_file() {
            return Err(LfsError::NotAFile);
        }
        if !check_access(&inode, self.cred, MODE_WRITE) {
            return Err(LfsError::PermissionDenied);
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(LfsError::FileTooLarge);
        }

        let required = bytes.len().div_ceil(BLOCK_SIZE);

        // Acquire every missing block before mutating anything; roll the
        // fresh ones back if the image runs out part-way.
        let mut fresh: Vec<BlockId> = Vec::new();
        for i in 0..required {
            if inode.direct_blocks[i].0 != 0 {
                continue;
            }
            match self.allocate_block_near(id) {
                Ok(block) => fresh.push(block),
                Err(err) => {
                    for block in fresh.drain(..) {
                        lfs_alloc::free_block(&mut self.dev, &self.geo, block)?;
                    }
                    return Err(err);
                }
            }
        }

        // Shrink: drop blocks past the new length.
        for i in required..NUM_DIRECT_BLOCKS {
            let block = inode.direct_blocks[i];
            if block.0 != 0 {
                lfs_alloc::free_block(&mut self.dev, &self.geo, block)?;
                inode.direct_blocks[i] = BlockId(0);
            }
        }

        // Fill the holes with the fresh blocks, in order.
        let mut next_fresh = fresh.into_iter();
        for slot in inode.direct_blocks.iter_mut().take(required) {
            if slot.0 == 0 {
                if let Some(block) = next_fresh.next() {
                    *slot = block;
                }
            }
        }

        for (i, chunk) in bytes.chunks(BLOCK_SIZE).enumerate() {
            let block_id = inode.direct_blocks[i];
            let block = self.dev.borrow_block(block_id)?;
            block[..chunk.len()].copy_from_slice(chunk);
        }

        inode.file_size = bytes.len() as u64;
        lfs_alloc::write_inode(&mut self.dev, &self.geo, id, &inode)?;

        debug!(target: "lfs::fs", path, bytes = bytes.len(), blocks = required, "file written");
        Ok(())
    }

    /// Read the full content of the file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let tokens = paths::tokenize(path);
        let id = self.resolve_path(&tokens)?;
        let inode = self.inode_for(id)?;
        if !inode.is_file() {
            return Err(LfsError::NotAFile);
        }
        if !check_access(&inode, self.cred, MODE_READ) {
            return Err(LfsError::PermissionDenied);
        }

        let mut out = vec![0_u8; inode.file_size as usize];
        for (i, chunk) in out.chunks_mut(BLOCK_SIZE).enumerate() {
            let block_id = inode.direct_blocks[i];
            if block_id.0 == 0 {
                return Err(LfsError::InvalidImage);
            }
            let block = self.dev.block_view(block_id)?;
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
        Ok(out)
    }

    // ── Deletion ────────────────────────────────────────────────────────

    /// Remove the file at `path`, releasing its blocks and inode.
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        let (parent_id, block_id, slot, entry) = self.prepare_removal(path)?;
        let target = self.inode_for(entry.inode_id)?;
        if !target.is_file() {
            return Err(LfsError::NotAFile);
        }

        self.release_file_resources(entry.inode_id)?;
        self.remove_entry_slot(parent_id, block_id, slot)?;

        debug!(target: "lfs::fs", path, inode = entry.inode_id.0, "file deleted");
        Ok(())
    }

    /// Remove the directory at `path` and everything below it.
    pub fn delete_dir(&mut self, path: &str) -> Result<()> {
        let (parent_id, block_id, slot, entry) = self.prepare_removal(path)?;
        let target = self.inode_for(entry.inode_id)?;
        if !target.is_directory() {
            return Err(LfsError::NotADirectory);
        }

        self.recursive_release(entry.inode_id)?;
        self.remove_entry_slot(parent_id, block_id, slot)?;

        debug!(target: "lfs::fs", path, inode = entry.inode_id.0, "directory deleted");
        Ok(())
    }

    /// Shared removal preamble: resolve the parent, check write access
    /// on it, locate the entry. Nothing is mutated yet.
    fn prepare_removal(&self, path: &str) -> Result<(InodeId, BlockId, usize, DirEntry)> {
        let tokens = paths::tokenize(path);
        let Some((&name, _)) = tokens.split_last() else {
            return Err(LfsError::InvalidArgument("path names no entry"));
        };

        let parent_id = self.resolve_parent(&tokens)?;
        let parent = self.inode_for(parent_id)?;
        if !parent.is_directory() {
            return Err(LfsError::NotADirectory);
        }
        if !check_access(&parent, self.cred, MODE_WRITE) {
            return Err(LfsError::PermissionDenied);
        }

        let (block_id, slot, entry) = self
            .locate_entry(&parent, name.as_bytes())?
            .ok_or(LfsError::NotFound)?;
        Ok((parent_id, block_id, slot, entry))
    }

    /// Tombstone one entry slot and shrink the parent's size.
    fn remove_entry_slot(&mut self, parent_id: InodeId, block_id: BlockId, slot: usize) -> Result<()> {
        let block = self.dev.borrow_block(block_id)?;
        block[dirent_slot_range(slot)].fill(0);

        let mut parent = self.inode_for(parent_id)?;
        parent.file_size = parent.file_size.saturating_sub(DIR_ENTRY_SIZE as u64);
        lfs_alloc::write_inode(&mut self.dev, &self.geo, parent_id, &parent)
    }

    /// Free every block of a file inode, then the inode itself.
    fn release_file_resources(&mut self, id: InodeId) -> Result<()> {
        let inode = self.inode_for(id)?;
        // Clear the references before the bitmap bits flip.
        lfs_alloc::clear_inode_slot(&mut self.dev, &self.geo, id)?;
        for block in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
            lfs_alloc::free_block(&mut self.dev, &self.geo, *block)?;
        }
        lfs_alloc::free_inode(&mut self.dev, &self.geo, id)
    }

    /// Depth-first post-order release of a directory subtree.
    ///
    /// Every descendant is visited exactly once; a directory's blocks
    /// are freed only after their entries have been processed, so no
    /// in-flight reference is invalidated.
    fn recursive_release(&mut self, id: InodeId) -> Result<()> {
        let inode = self.inode_for(id)?;

        for block_id in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
            let entries = dir::live_entries(self.dev.block_view(*block_id)?)?;
            for (_, entry) in entries {
                let child = self.inode_for(entry.inode_id)?;
                if child.is_directory() {
                    self.recursive_release(entry.inode_id)?;
                } else {
                    self.release_file_resources(entry.inode_id)?;
                }
            }
        }

        lfs_alloc::clear_inode_slot(&mut self.dev, &self.geo, id)?;
        for block in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
            lfs_alloc::free_block(&mut self.dev, &self.geo, *block)?;
        }
        lfs_alloc::free_inode(&mut self.dev, &self.geo, id)
    }

    /// Zero an inode's slot and release its bitmap bit (no blocks).
    fn release_inode(&mut self, id: InodeId) -> Result<()> {
        lfs_alloc::clear_inode_slot(&mut self.dev, &self.geo, id)?;
        lfs_alloc::free_inode(&mut self.dev, &self.geo, id)
    }

    // ── Listing ─────────────────────────────────────────────────────────

    /// List the directory at `path` in on-disk (insertion) order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirRecord>> {
        let tokens = paths::tokenize(path);
        let id = self.resolve_path(&tokens)?;
        let inode = self.inode_for(id)?;
        if !inode.is_directory() {
            return Err(LfsError::NotADirectory);
        }
        if !check_access(&inode, self.cred, MODE_READ) {
            return Err(LfsError::PermissionDenied);
        }

        let mut records = Vec::new();
        for block_id in inode.direct_blocks.iter().filter(|b| b.0 != 0) {
            for (_, entry) in dir::live_entries(self.dev.block_view(*block_id)?)? {
                let child = self.inode_for(entry.inode_id)?;
                records.push(DirRecord {
                    name: entry.name_str(),
                    uid: child.uid,
                    gid: child.gid,
                    permissions: child.permissions,
                    is_directory: child.is_directory(),
                });
            }
        }
        Ok(records)
    }

    // ── Path resolution ─────────────────────────────────────────────────

    /// Inode of the directory containing the last token. Zero or one
    /// token resolves to the root.
    fn resolve_parent(&self, tokens: &[&str]) -> Result<InodeId> {
        let mut current = self.sb.root_inode;
        if tokens.len() <= 1 {
            return Ok(current);
        }

        for token in &tokens[..tokens.len() - 1] {
            let inode = self.inode_for(current)?;
            if !inode.is_directory() {
                return Err(LfsError::NotADirectory);
            }
            let next = self.find_in_dir(&inode, token.as_bytes())?;
            if next.is_null() {
                return Err(LfsError::NotFound);
            }
            current = next;
        }
        Ok(current)
    }

    /// Inode named by a full token sequence; the root for an empty one.
    fn resolve_path(&self, tokens: &[&str]) -> Result<InodeId> {
        let Some((&name, _)) = tokens.split_last() else {
            return Ok(self.sb.root_inode);
        };

        let parent_id = self.resolve_parent(tokens)?;
        let parent = self.inode_for(parent_id)?;
        if !parent.is_directory() {
            return Err(LfsError::NotADirectory);
        }
        let id = self.find_in_dir(&parent, name.as_bytes())?;
        if id.is_null() {
            return Err(LfsError::NotFound);
        }
        Ok(id)
    }

    /// Fetch an inode by global id, routed to its group's table.
    fn inode_for(&self, id: InodeId) -> Result<Inode> {
        lfs_alloc::read_inode(&self.dev, &self.geo, id)
    }

    /// Id of the entry named `name` in `dir`, or the null id.
    ///
    /// Directory blocks are filled in order, so the scan stops at the
    /// first unallocated pointer.
    fn find_in_dir(&self, dir: &Inode, name: &[u8]) -> Result<InodeId> {
        Ok(self
            .locate_entry(dir, name)?
            .map_or(InodeId::NULL, |(_, _, entry)| entry.inode_id))
    }

    /// Locate an entry by name: (block, slot, entry).
    fn locate_entry(&self, dir: &Inode, name: &[u8]) -> Result<Option<(BlockId, usize, DirEntry)>> {
        for block_id in dir.direct_blocks {
            if block_id.0 == 0 {
                break;
            }
            let block = self.dev.block_view(block_id)?;
            if let Some((slot, entry)) = dir::find_named(block, name)? {
                return Ok(Some((block_id, slot, entry)));
            }
        }
        Ok(None)
    }

    // ── Allocation policy ───────────────────────────────────────────────

    /// Allocate an inode from the first group with a free slot.
    fn allocate_inode_any_group(&mut self) -> Result<InodeId> {
        for group in self.geo.groups() {
            if let Some(id) = lfs_alloc::allocate_inode(&mut self.dev, &self.geo, group)? {
                return Ok(id);
            }
        }
        Err(LfsError::NoSpace)
    }

    /// Allocate a file data block, preferring the owning inode's group,
    /// then scanning every group in index order.
    fn allocate_block_near(&mut self, inode_id: InodeId) -> Result<BlockId> {
        let home = self.geo.inode_group(inode_id);
        if let Some(block) = lfs_alloc::allocate_block(&mut self.dev, &self.geo, home)? {
            return Ok(block);
        }
        for group in self.geo.groups() {
            if group == home {
                continue;
            }
            if let Some(block) = lfs_alloc::allocate_block(&mut self.dev, &self.geo, group)? {
                return Ok(block);
            }
        }
        Err(LfsError::NoSpace)
    }
}

/// Commit the superblock into block 0, zero-padded to a full block.
fn write_superblock<R: ByteRegion>(dev: &mut BlockDevice<R>, sb: &Superblock) -> Result<()> {
    let mut buf = vec![0_u8; BLOCK_SIZE];
    sb.encode_into(&mut buf);
    dev.write_block(BlockId(0), &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_with_blocks(blocks: usize) -> LatticeFs<Vec<u8>> {
        let dev = BlockDevice::new(vec![0_u8; blocks * BLOCK_SIZE]).expect("device");
        LatticeFs::format(dev).expect("format")
    }

    fn small_fs() -> LatticeFs<Vec<u8>> {
        // Single group: 2 table blocks, reserved span [0, 5), 59 data
        // blocks, 63 usable inodes.
        fs_with_blocks(64)
    }

    #[test]
    fn format_allocates_root_as_inode_one() {
        let fs = small_fs();
        assert_eq!(fs.superblock().root_inode, InodeId::ROOT);

        let root = fs.inode_for(InodeId::ROOT).expect("root");
        assert!(root.is_directory());
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);
        assert_eq!(root.permissions, DEFAULT_DIR_PERMS);
        assert_eq!(root.file_size, 0);
    }

    #[test]
    fn fresh_root_lists_empty() {
        let fs = small_fs();
        assert!(fs.list_dir("/").expect("list").is_empty());
        assert!(fs.list_dir("").expect("list").is_empty());
    }

    #[test]
    fn mount_rejects_unformatted_image() {
        let dev = BlockDevice::new(vec![0_u8; 8 * BLOCK_SIZE]).unwrap();
        assert_eq!(
            LatticeFs::mount(dev).err(),
            Some(LfsError::InvalidImage)
        );
    }

    #[test]
    fn mount_recovers_formatted_image() {
        let fs = small_fs();
        let region = fs.into_device().into_region();
        let fs = LatticeFs::mount(BlockDevice::new(region).unwrap()).expect("mount");
        assert_eq!(fs.superblock().root_inode, InodeId::ROOT);
        assert!(fs.list_dir("/").unwrap().is_empty());
    }

    #[test]
    fn create_and_list_file() {
        let mut fs = small_fs();
        fs.create_file("/hello.txt").expect("create");

        let listing = fs.list_dir("/").expect("list");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "hello.txt");
        assert!(!listing[0].is_directory);
        assert_eq!(listing[0].permissions, DEFAULT_FILE_PERMS);
        assert_eq!(listing[0].uid, 0);
    }

    #[test]
    fn create_rejects_duplicates() {
        let mut fs = small_fs();
        fs.create_file("/x").unwrap();
        assert_eq!(fs.create_file("/x"), Err(LfsError::AlreadyExists));
        assert_eq!(fs.create_dir("/x"), Err(LfsError::AlreadyExists));
    }

    #[test]
    fn create_rejects_empty_and_overlong_names() {
        let mut fs = small_fs();
        assert!(matches!(
            fs.create_file("/"),
            Err(LfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.create_file(""),
            Err(LfsError::InvalidArgument(_))
        ));
        let long = format!("/{}", "n".repeat(255));
        assert!(matches!(
            fs.create_file(&long),
            Err(LfsError::InvalidArgument(_))
        ));
        // 254 bytes is still a legal name.
        let edge = format!("/{}", "n".repeat(254));
        fs.create_file(&edge).expect("254-byte name");
    }

    #[test]
    fn nested_creation_walks_the_tree() {
        let mut fs = small_fs();
        fs.create_dir("/a").unwrap();
        fs.create_dir("/a/b").unwrap();
        fs.create_file("/a/b/c.txt").unwrap();

        assert_eq!(fs.list_dir("/a").unwrap().len(), 1);
        let leaf = fs.list_dir("/a/b").unwrap();
        assert_eq!(leaf.len(), 1);
        assert_eq!(leaf[0].name, "c.txt");
    }

    #[test]
    fn missing_intermediate_is_not_found() {
        let mut fs = small_fs();
        assert_eq!(fs.create_file("/no/such.txt"), Err(LfsError::NotFound));
        assert_eq!(fs.read_file("/no/such.txt"), Err(LfsError::NotFound));
        assert_eq!(fs.list_dir("/no"), Err(LfsError::NotFound));
    }

    #[test]
    fn file_in_path_position_is_not_a_directory() {
        let mut fs = small_fs();
        fs.create_file("/f").unwrap();
        assert_eq!(fs.create_file("/f/x"), Err(LfsError::NotADirectory));
        assert_eq!(fs.list_dir("/f"), Err(LfsError::NotADirectory));
    }

    #[test]
    fn write_read_round_trip() {
        let mut fs = small_fs();
        fs.create_file("/data.bin").unwrap();

        assert_eq!(fs.read_file("/data.bin").unwrap(), Vec::<u8>::new());

        fs.write_file("/data.bin", b"X").unwrap();
        assert_eq!(fs.read_file("/data.bin").unwrap(), b"X");

        // Grow across a block boundary, then shrink back.
        let two_blocks = vec![0xA5_u8; BLOCK_SIZE + 17];
        fs.write_file("/data.bin", &two_blocks).unwrap();
        assert_eq!(fs.read_file("/data.bin").unwrap(), two_blocks);

        fs.write_file("/data.bin", b"abc").unwrap();
        assert_eq!(fs.read_file("/data.bin").unwrap(), b"abc");
    }

    #[test]
    fn write_at_exact_capacity_boundary() {
        let mut fs = fs_with_blocks(256);
        fs.create_file("/max.bin").unwrap();

        let max = vec![0x5A_u8; MAX_FILE_SIZE];
        fs.write_file("/max.bin", &max).unwrap();
        assert_eq!(fs.read_file("/max.bin").unwrap(), max);

        let over = vec![0_u8; MAX_FILE_SIZE + 1];
        assert_eq!(fs.write_file("/max.bin", &over), Err(LfsError::FileTooLarge));
        // The oversized write left the old content alone.
        assert_eq!(fs.read_file("/max.bin").unwrap(), max);
    }

    #[test]
    fn write_to_directory_is_not_a_file() {
        let mut fs = small_fs();
        fs.create_dir("/d").unwrap();
        assert_eq!(fs.write_file("/d", b"x"), Err(LfsError::NotAFile));
        assert_eq!(fs.read_file("/d"), Err(LfsError::NotAFile));
        assert_eq!(fs.write_file("/", b"x"), Err(LfsError::NotAFile));
    }

    #[test]
    fn delete_file_releases_and_tombstones() {
        let mut fs = small_fs();
        fs.create_file("/a").unwrap();
        fs.create_file("/b").unwrap();
        fs.write_file("/a", &vec![1_u8; 2 * BLOCK_SIZE]).unwrap();

        fs.delete_file("/a").unwrap();
        let names: Vec<String> = fs.list_dir("/").unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["b"]);
        assert_eq!(fs.read_file("/a"), Err(LfsError::NotFound));

        // The tombstoned slot is reused by the next create.
        fs.create_file("/c").unwrap();
        let names: Vec<String> = fs.list_dir("/").unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["c", "b"]);
    }

    #[test]
    fn delete_rejects_wrong_kind() {
        let mut fs = small_fs();
        fs.create_dir("/d").unwrap();
        fs.create_file("/f").unwrap();

        assert_eq!(fs.delete_file("/d"), Err(LfsError::NotAFile));
        assert_eq!(fs.delete_dir("/f"), Err(LfsError::NotADirectory));
        // Neither refusal mutated anything.
        assert_eq!(fs.list_dir("/").unwrap().len(), 2);
        assert_eq!(fs.delete_file("/nope"), Err(LfsError::NotFound));
    }

    #[test]
    fn recursive_delete_reclaims_subtree() {
        let mut fs = small_fs();
        fs.create_dir("/top").unwrap();
        fs.create_dir("/top/mid").unwrap();
        fs.create_file("/top/mid/leaf").unwrap();
        fs.write_file("/top/mid/leaf", b"payload").unwrap();
        fs.create_file("/top/other").unwrap();

        let free_before = lfs_alloc::free_block_count(fs.device(), fs.geometry()).unwrap();
        fs.delete_dir("/top").unwrap();

        assert!(fs.list_dir("/").unwrap().is_empty());
        // Everything the subtree held came back: its inodes and all of
        // its directory and data blocks.
        let free_after = lfs_alloc::free_block_count(fs.device(), fs.geometry()).unwrap();
        assert!(free_after > free_before);
        assert_eq!(
            lfs_alloc::free_inode_count(fs.device(), fs.geometry()).unwrap(),
            63 - 1 // only the root remains allocated
        );
    }

    #[test]
    fn directory_grows_past_one_block() {
        let mut fs = fs_with_blocks(256);
        // 15 entries fill the first block; the 16th forces growth.
        for i in 0..16 {
            fs.create_file(&format!("/f{i}")).unwrap();
        }
        let listing = fs.list_dir("/").unwrap();
        assert_eq!(listing.len(), 16);

        let root = fs.inode_for(InodeId::ROOT).unwrap();
        assert_ne!(root.direct_blocks[1].0, 0);
        assert_eq!(root.file_size, 16 * DIR_ENTRY_SIZE as u64);
    }

    #[test]
    fn permissions_guard_every_surface() {
        let mut fs = small_fs();
        fs.login(100, 100);
        fs.create_file("/mine.txt").unwrap();
        fs.write_file("/mine.txt", b"secret").unwrap();

        fs.login(200, 200);
        assert_eq!(
            fs.write_file("/mine.txt", b"hack"),
            Err(LfsError::PermissionDenied)
        );
        // 0644 lets strangers read.
        assert_eq!(fs.read_file("/mine.txt").unwrap(), b"secret");
        // Deleting needs write access on the root directory (0755,
        // owned by uid 0), which a stranger does not have.
        assert_eq!(fs.delete_file("/mine.txt"), Err(LfsError::PermissionDenied));
        assert_eq!(fs.create_file("/theirs.txt"), Err(LfsError::PermissionDenied));

        fs.logout();
        fs.delete_file("/mine.txt").unwrap();
        assert!(fs.list_dir("/").unwrap().is_empty());
    }

    #[test]
    fn listing_reports_ownership() {
        let mut fs = small_fs();
        fs.login(500, 501);
        // uid 500 cannot write the root; become root for the creates,
        // then inspect as the user.
        fs.logout();
        fs.create_dir("/d").unwrap();
        fs.login(500, 501);
        assert_eq!(fs.create_file("/d2"), Err(LfsError::PermissionDenied));
        fs.logout();

        let listing = fs.list_dir("/").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].uid, 0);
        assert!(listing[0].is_directory);
        assert_eq!(listing[0].permissions, DEFAULT_DIR_PERMS);
    }

    #[test]
    fn failed_create_leaves_no_allocation_behind() {
        let mut fs = small_fs();
        let free_inodes =
            lfs_alloc::free_inode_count(fs.device(), fs.geometry()).unwrap();

        // A full directory (12 blocks * 15 slots) would be expensive to
        // build here; instead exhaust the data blocks so that growing
        // the root directory fails.
        fs.create_file("/sponge").unwrap();
        loop {
            let free = lfs_alloc::free_block_count(fs.device(), fs.geometry()).unwrap();
            if free == 0 {
                break;
            }
            let grow = vec![0_u8; (free.min(12) as usize) * BLOCK_SIZE];
            let name = format!("/s{free}");
            fs.create_file(&name).unwrap();
            fs.write_file(&name, &grow).unwrap();
        }

        // Root's first dir block has free slots, so small creates still
        // succeed; fill the remaining slots of block 0 to force growth.
        let used = fs.list_dir("/").unwrap().len();
        for i in used..15 {
            fs.create_file(&format!("/pad{i}")).unwrap();
        }

        let inodes_before = lfs_alloc::free_inode_count(fs.device(), fs.geometry()).unwrap();
        assert!(inodes_before < free_inodes);
        // The 16th entry needs a fresh directory block and there is none.
        assert_eq!(fs.create_file("/one-too-many"), Err(LfsError::NoSpace));
        // The speculatively allocated inode was returned.
        assert_eq!(
            lfs_alloc::free_inode_count(fs.device(), fs.geometry()).unwrap(),
            inodes_before
        );
    }

    #[test]
    fn deep_paths_resolve() {
        let mut fs = fs_with_blocks(256);
        let mut path = String::new();
        for depth in 0..10 {
            path.push_str(&format!("/l{depth}"));
            fs.create_dir(&path).unwrap();
        }
        let file = format!("{path}/deep.txt");
        fs.create_file(&file).unwrap();
        fs.write_file(&file, b"deep").unwrap();
        assert_eq!(fs.read_file(&file).unwrap(), b"deep");

        fs.delete_dir("/l0").unwrap();
        assert!(fs.list_dir("/").unwrap().is_empty());
    }
}
