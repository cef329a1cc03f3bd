//! `RoFS` (§4.5): wraps an inner `Vfs` and turns every mutating operation
//! into a permission-denied error. Reads pass straight through.

use std::io::SeekFrom;
use std::sync::Arc;

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::IdentityManager;
use crate::perm::{Gid, Mode, Uid};
use crate::vfs_trait::{AccessMode, DirEntry, FileInfo, Features, OpenFlags, Vfs, VfsFile};

pub struct RoFS {
    inner: Arc<dyn Vfs>,
}

impl RoFS {
    pub fn new(inner: Arc<dyn Vfs>) -> Self {
        Self { inner }
    }

    fn denied(&self, op: &'static str, path: &str) -> VfsError {
        VfsError::path(op, path, ErrorKind::PermissionDenied, self.inner.os_type())
    }
}

/// A handle obtained through `RoFS`: every mutating operation is denied
/// regardless of what the wrapped handle itself would have allowed.
struct RoFile {
    inner: Box<dyn VfsFile>,
    family: OsFamily,
}

impl RoFile {
    fn denied(&self, op: &'static str) -> VfsError {
        VfsError::path(op, self.inner.name(), ErrorKind::PermissionDenied, self.family)
    }
}

impl VfsFile for RoFile {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.inner.read(buf)
    }

    fn read_at(&self, buf: &mut [u8], off: u64) -> VfsResult<usize> {
        self.inner.read_at(buf, off)
    }

    fn write(&self, _buf: &[u8]) -> VfsResult<usize> {
        Err(self.denied("write"))
    }

    fn write_at(&self, _buf: &[u8], _off: u64) -> VfsResult<usize> {
        Err(self.denied("writeat"))
    }

    fn seek(&self, pos: SeekFrom) -> VfsResult<u64> {
        self.inner.seek(pos)
    }

    fn truncate(&self, _size: u64) -> VfsResult<()> {
        Err(self.denied("truncate"))
    }

    fn read_dir(&self, n: isize) -> VfsResult<Vec<DirEntry>> {
        self.inner.read_dir(n)
    }

    fn chdir(&self) -> VfsResult<()> {
        self.inner.chdir()
    }

    fn chmod(&self, _mode: Mode) -> VfsResult<()> {
        Err(self.denied("chmod"))
    }

    fn chown(&self, _uid: Uid, _gid: Gid) -> VfsResult<()> {
        Err(self.denied("chown"))
    }

    fn sync(&self) -> VfsResult<()> {
        Err(self.denied("sync"))
    }

    fn stat(&self) -> VfsResult<FileInfo> {
        self.inner.stat()
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn close(&self) -> VfsResult<()> {
        self.inner.close()
    }
}

impl Vfs for RoFS {
    fn features(&self) -> Features {
        (self.inner.features() & !Features::IDENTITY_MGR) | Features::READ_ONLY
    }

    fn os_type(&self) -> OsFamily {
        self.inner.os_type()
    }

    fn name(&self) -> String {
        format!("{}(ro)", self.inner.name())
    }

    fn vfs_type(&self) -> &'static str {
        "rofs"
    }

    fn umask(&self) -> Mode {
        self.inner.umask()
    }

    fn set_umask(&self, _mask: Mode) {
        // A read-only fs has no mutable state worth keeping; the call is
        // accepted but has no effect, matching umask's per-process nature.
    }

    fn user(&self) -> String {
        self.inner.user()
    }

    fn set_user(&self, name: &str) -> VfsResult<()> {
        self.inner.set_user(name)
    }

    fn idm(&self) -> Arc<dyn IdentityManager> {
        self.inner.idm()
    }

    fn sub(&self, dir: &str) -> VfsResult<Arc<dyn Vfs>> {
        let sub_inner = self.inner.sub(dir)?;
        Ok(Arc::new(RoFS::new(sub_inner)))
    }

    fn mkdir(&self, name: &str, _perm: Mode) -> VfsResult<()> {
        Err(self.denied("mkdir", name))
    }

    fn mkdir_all(&self, path: &str, _perm: Mode) -> VfsResult<()> {
        Err(self.denied("mkdirall", path))
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: Mode) -> VfsResult<Box<dyn VfsFile>> {
        if flags.access != AccessMode::ReadOnly {
            return Err(self.denied("openfile", name));
        }
        let inner = self.inner.open_file(name, flags, perm)?;
        Ok(Box::new(RoFile {
            inner,
            family: self.inner.os_type(),
        }))
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo> {
        self.inner.stat(name)
    }

    fn lstat(&self, name: &str) -> VfsResult<FileInfo> {
        self.inner.lstat(name)
    }

    fn eval_symlinks(&self, name: &str) -> VfsResult<String> {
        self.inner.eval_symlinks(name)
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        self.inner.readlink(name)
    }

    fn chmod(&self, name: &str, _mode: Mode) -> VfsResult<()> {
        Err(self.denied("chmod", name))
    }

    fn chown(&self, name: &str, _uid: Uid, _gid: Gid) -> VfsResult<()> {
        Err(self.denied("chown", name))
    }

    fn lchown(&self, name: &str, _uid: Uid, _gid: Gid) -> VfsResult<()> {
        Err(self.denied("lchown", name))
    }

    fn chtimes(&self, name: &str, _atime_ns: i64, _mtime_ns: i64) -> VfsResult<()> {
        Err(self.denied("chtimes", name))
    }

    fn chdir(&self, dir: &str) -> VfsResult<()> {
        self.inner.chdir(dir)
    }

    fn getwd(&self) -> VfsResult<String> {
        self.inner.getwd()
    }

    fn truncate(&self, name: &str, _size: u64) -> VfsResult<()> {
        Err(self.denied("truncate", name))
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.denied("link", new))
    }

    fn symlink(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.denied("symlink", new))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        Err(self.denied("remove", name))
    }

    fn remove_all(&self, path: &str) -> VfsResult<()> {
        Err(self.denied("removeall", path))
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.denied("rename", new))
    }

    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>> {
        self.inner.read_dir(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemfsBuilder;

    fn ro_over_populated_memfs() -> RoFS {
        let inner: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        inner.write_file("/f", b"hello", 0o644).unwrap();
        RoFS::new(inner)
    }

    #[test]
    fn reads_pass_through() {
        let fs = ro_over_populated_memfs();
        assert_eq!(fs.read_file("/f").unwrap(), b"hello");
    }

    #[test]
    fn mutations_are_denied() {
        let fs = ro_over_populated_memfs();
        assert_eq!(fs.mkdir("/d", 0o755).unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(fs.remove("/f").unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            fs.write_file("/f", b"x", 0o644).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn open_file_rejects_anything_but_read_only() {
        let fs = ro_over_populated_memfs();
        let f = fs.open("/f").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(
            fs.create("/g").unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn read_only_handle_refuses_mutation() {
        let fs = ro_over_populated_memfs();
        let f = fs.open("/f").unwrap();
        assert_eq!(f.write(b"x").unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(f.truncate(0).unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(f.chmod(0o600).unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(f.chown(0, 0).unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(f.sync().unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn sub_stays_read_only() {
        let fs = ro_over_populated_memfs();
        let sub = fs.sub("/").unwrap();
        assert_eq!(
            sub.write_file("/g", b"x", 0o644).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }
}
