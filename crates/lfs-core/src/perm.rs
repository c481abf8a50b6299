//! Discretionary access control.
//!
//! The engine carries one ambient identity per session. Checks pick the
//! owner, group or other triplet of the target inode's permission bits
//! — first match wins — and uid 0 bypasses everything.

use lfs_ondisk::Inode;

/// Ambient caller identity. Defaults to root (0, 0) on engine
/// construction and after `logout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u16,
    pub gid: u16,
}

impl Credentials {
    pub const ROOT: Self = Self { uid: 0, gid: 0 };

    #[must_use]
    pub fn new(uid: u16, gid: u16) -> Self {
        Self { uid, gid }
    }

    #[must_use]
    pub fn is_root(self) -> bool {
        self.uid == 0
    }
}

/// Whether `cred` may access `inode` with the requested mode bits
/// (`MODE_READ` / `MODE_WRITE` / `MODE_EXEC`).
#[must_use]
pub fn check_access(inode: &Inode, cred: Credentials, mode: u16) -> bool {
    if cred.is_root() {
        return true;
    }

    let triplet = if inode.uid == cred.uid {
        inode.permissions >> 6
    } else if inode.gid == cred.gid {
        inode.permissions >> 3
    } else {
        inode.permissions
    } & 0o7;

    triplet & mode != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfs_ondisk::FileType;
    use lfs_types::{InodeId, MODE_EXEC, MODE_READ, MODE_WRITE};

    fn file_0644(uid: u16, gid: u16) -> Inode {
        let mut inode = Inode::free(InodeId(5));
        inode.file_type = FileType::File;
        inode.uid = uid;
        inode.gid = gid;
        inode.permissions = 0o644;
        inode
    }

    #[test]
    fn root_bypasses_everything() {
        let inode = file_0644(100, 100);
        for mode in [MODE_READ, MODE_WRITE, MODE_EXEC] {
            assert!(check_access(&inode, Credentials::ROOT, mode));
        }
    }

    #[test]
    fn owner_triplet_selected_first() {
        let inode = file_0644(100, 100);
        let owner = Credentials::new(100, 100);
        assert!(check_access(&inode, owner, MODE_READ));
        assert!(check_access(&inode, owner, MODE_WRITE));
        assert!(!check_access(&inode, owner, MODE_EXEC));
    }

    #[test]
    fn group_triplet_when_uid_differs() {
        let inode = file_0644(100, 100);
        let member = Credentials::new(200, 100);
        assert!(check_access(&inode, member, MODE_READ));
        assert!(!check_access(&inode, member, MODE_WRITE));
    }

    #[test]
    fn other_triplet_as_last_resort() {
        let inode = file_0644(100, 100);
        let stranger = Credentials::new(200, 200);
        assert!(check_access(&inode, stranger, MODE_READ));
        assert!(!check_access(&inode, stranger, MODE_WRITE));
    }

    #[test]
    fn owner_match_shadows_more_permissive_other() {
        // 0o077: owner gets nothing, everyone else full access. The
        // owner triplet still wins for the owner.
        let mut inode = file_0644(100, 100);
        inode.permissions = 0o077;
        let owner = Credentials::new(100, 999);
        assert!(!check_access(&inode, owner, MODE_READ));
        let stranger = Credentials::new(300, 999);
        assert!(check_access(&inode, stranger, MODE_READ));
    }
}
