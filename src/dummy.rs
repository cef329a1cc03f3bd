//! `DummyFS`: a no-op `Vfs` with a single, permanently empty root directory.
//! Every lookup past the root reports [`ErrorKind::NotExist`] and every
//! mutation reports [`ErrorKind::OpNotPermitted`]; nothing is ever stored.
//!
//! Exists mainly as a second, trivially-distinct `Vfs` to mount in
//! [`crate::mountfs::MountFS`] tests without standing up a second populated
//! `MemFS`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::{IdentityManager, InMemoryIdm};
use crate::perm::{Gid, Mode, Uid};
use crate::vfs_trait::{DirEntry, FileInfo, FileKind, Features, OpenFlags, Vfs, VfsFile};

pub struct DummyFS {
    family: OsFamily,
    idm: Arc<dyn IdentityManager>,
    umask: AtomicU32,
}

impl DummyFS {
    pub fn new(family: OsFamily) -> Self {
        Self {
            family,
            idm: Arc::new(InMemoryIdm::default()),
            umask: AtomicU32::new(0o022),
        }
    }

    fn not_exist(&self, op: &'static str, path: &str) -> VfsError {
        VfsError::path(op, path, ErrorKind::NotExist, self.family)
    }

    fn not_permitted(&self, op: &'static str, path: &str) -> VfsError {
        VfsError::path(op, path, ErrorKind::OpNotPermitted, self.family)
    }

    fn is_root(&self, path: &str) -> bool {
        self.clean(path) == self.path_separator().to_string()
    }
}

impl Default for DummyFS {
    fn default() -> Self {
        Self::new(OsFamily::Linux)
    }
}

impl Vfs for DummyFS {
    fn features(&self) -> Features {
        Features::IDENTITY_MGR | Features::READ_ONLY
    }

    fn os_type(&self) -> OsFamily {
        self.family
    }

    fn name(&self) -> String {
        "DummyFS".to_string()
    }

    fn vfs_type(&self) -> &'static str {
        "dummy"
    }

    fn umask(&self) -> Mode {
        self.umask.load(Ordering::Relaxed)
    }

    fn set_umask(&self, mask: Mode) {
        self.umask.store(mask & 0o777, Ordering::Relaxed);
    }

    fn user(&self) -> String {
        "root".to_string()
    }

    fn set_user(&self, _name: &str) -> VfsResult<()> {
        Ok(())
    }

    fn idm(&self) -> Arc<dyn IdentityManager> {
        self.idm.clone()
    }

    fn mkdir(&self, name: &str, _perm: Mode) -> VfsResult<()> {
        Err(self.not_permitted("mkdir", name))
    }

    fn mkdir_all(&self, path: &str, _perm: Mode) -> VfsResult<()> {
        if self.is_root(path) {
            return Ok(());
        }
        Err(self.not_permitted("mkdirall", path))
    }

    fn open_file(&self, name: &str, _flags: OpenFlags, _perm: Mode) -> VfsResult<Box<dyn VfsFile>> {
        Err(self.not_exist("openfile", name))
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo> {
        if self.is_root(name) {
            return Ok(FileInfo {
                name: self.path_separator().to_string(),
                size: 0,
                mode: 0o755,
                mod_time_ns: 0,
                uid: 0,
                gid: 0,
                kind: FileKind::Dir,
                file_id: None,
                nlink: 0,
            });
        }
        Err(self.not_exist("stat", name))
    }

    fn lstat(&self, name: &str) -> VfsResult<FileInfo> {
        self.stat(name)
    }

    fn eval_symlinks(&self, name: &str) -> VfsResult<String> {
        if self.is_root(name) {
            return Ok(self.path_separator().to_string());
        }
        Err(self.not_exist("evalsymlinks", name))
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        Err(self.not_exist("readlink", name))
    }

    fn chmod(&self, name: &str, _mode: Mode) -> VfsResult<()> {
        Err(self.not_permitted("chmod", name))
    }

    fn chown(&self, name: &str, _uid: Uid, _gid: Gid) -> VfsResult<()> {
        Err(self.not_permitted("chown", name))
    }

    fn lchown(&self, name: &str, _uid: Uid, _gid: Gid) -> VfsResult<()> {
        Err(self.not_permitted("lchown", name))
    }

    fn chtimes(&self, name: &str, _atime_ns: i64, _mtime_ns: i64) -> VfsResult<()> {
        Err(self.not_permitted("chtimes", name))
    }

    fn chdir(&self, dir: &str) -> VfsResult<()> {
        if self.is_root(dir) {
            return Ok(());
        }
        Err(self.not_exist("chdir", dir))
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok(self.path_separator().to_string())
    }

    fn truncate(&self, name: &str, _size: u64) -> VfsResult<()> {
        Err(self.not_exist("truncate", name))
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.not_permitted("link", new))
    }

    fn symlink(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.not_permitted("symlink", new))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        Err(self.not_permitted("remove", name))
    }

    fn remove_all(&self, path: &str) -> VfsResult<()> {
        if self.is_root(path) {
            return Err(self.not_permitted("removeall", path));
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.not_exist("rename", new))
    }

    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>> {
        if self.is_root(name) {
            return Ok(Vec::new());
        }
        Err(self.not_exist("readdir", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_and_is_empty() {
        let fs = DummyFS::default();
        assert!(fs.stat("/").unwrap().is_dir());
        assert!(fs.read_dir("/").unwrap().is_empty());
    }

    #[test]
    fn anything_past_root_is_not_found() {
        let fs = DummyFS::default();
        assert_eq!(fs.stat("/anything").unwrap_err().kind(), ErrorKind::NotExist);
    }

    #[test]
    fn mutations_are_refused() {
        let fs = DummyFS::default();
        assert_eq!(fs.mkdir("/d", 0o755).unwrap_err().kind(), ErrorKind::OpNotPermitted);
        assert_eq!(fs.remove("/d").unwrap_err().kind(), ErrorKind::OpNotPermitted);
    }
}
