//! `BasePathFS` (§4.4): every path is clamped under a base directory of an
//! inner `Vfs` before being delegated, and inner errors are translated back
//! to outer coordinates.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::IdentityManager;
use crate::path;
use crate::perm::{Gid, Mode, Uid};
use crate::vfs_trait::{DirEntry, FileInfo, Features, OpenFlags, Vfs, VfsFile};

/// Clamps every path under `base` on an inner `Vfs`. A `..` that would
/// climb above the decorator's own root is silently dropped, the same way
/// `path::clean` drops a `..` above a rooted path — there is no tree
/// lookup involved in the clamp, it's pure lexical containment.
///
/// Symlink creation and `EvalSymlinks` are refused: a symlink written
/// through a BasePathFS could otherwise point outside the clamp and be
/// transparently followed by the inner fs.
pub struct BasePathFS {
    inner: Arc<dyn Vfs>,
    base: String,
    cwd: RwLock<String>,
}

impl BasePathFS {
    /// `base` must already exist as a directory in `inner`.
    pub fn new(inner: Arc<dyn Vfs>, base: &str) -> VfsResult<Self> {
        let info = inner.stat(base)?;
        if !info.is_dir() {
            return Err(VfsError::path(
                "basepathfs",
                base,
                ErrorKind::NotADirectory,
                inner.os_type(),
            ));
        }
        let cleaned = inner.clean(base);
        let sep = inner.os_type().path_separator().to_string();
        Ok(Self {
            inner,
            base: cleaned,
            cwd: RwLock::new(sep),
        })
    }

    fn to_base(&self, outer: &str) -> String {
        let family = self.inner.os_type();
        let cwd = self.cwd.read().unwrap().clone();
        let abs_outer = path::abs(outer, &cwd, family);
        format!("{}{}", self.base, abs_outer)
    }

    fn from_base(&self, inner_path: &Path) -> PathBuf {
        let s = inner_path.to_string_lossy();
        let stripped = s.strip_prefix(self.base.as_str()).unwrap_or(&s);
        if stripped.is_empty() {
            PathBuf::from(self.inner.os_type().path_separator().to_string())
        } else {
            PathBuf::from(stripped)
        }
    }

    fn rewrite(&self, err: VfsError) -> VfsError {
        err.map_paths(|p| self.from_base(p))
    }

    fn denied(&self, op: &'static str, path_: &str) -> VfsError {
        VfsError::path(op, path_, ErrorKind::OpNotPermitted, self.inner.os_type())
    }
}

impl Vfs for BasePathFS {
    fn features(&self) -> Features {
        self.inner.features() & !(Features::SYMLINK | Features::CHROOT)
    }

    fn os_type(&self) -> OsFamily {
        self.inner.os_type()
    }

    fn name(&self) -> String {
        format!("{}(base={})", self.inner.name(), self.base)
    }

    fn vfs_type(&self) -> &'static str {
        "basepathfs"
    }

    fn umask(&self) -> Mode {
        self.inner.umask()
    }

    fn set_umask(&self, mask: Mode) {
        self.inner.set_umask(mask);
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
        let sub_inner = self.inner.sub(&self.to_base(dir)).map_err(|e| self.rewrite(e))?;
        let sep = sub_inner.os_type().path_separator().to_string();
        Ok(Arc::new(BasePathFS {
            inner: sub_inner,
            base: sep.clone(),
            cwd: RwLock::new(sep),
        }))
    }

    fn mkdir(&self, name: &str, perm: Mode) -> VfsResult<()> {
        self.inner.mkdir(&self.to_base(name), perm).map_err(|e| self.rewrite(e))
    }

    fn mkdir_all(&self, path_: &str, perm: Mode) -> VfsResult<()> {
        self.inner
            .mkdir_all(&self.to_base(path_), perm)
            .map_err(|e| self.rewrite(e))
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: Mode) -> VfsResult<Box<dyn VfsFile>> {
        self.inner
            .open_file(&self.to_base(name), flags, perm)
            .map_err(|e| self.rewrite(e))
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo> {
        self.inner.stat(&self.to_base(name)).map_err(|e| self.rewrite(e))
    }

    fn lstat(&self, name: &str) -> VfsResult<FileInfo> {
        self.inner.lstat(&self.to_base(name)).map_err(|e| self.rewrite(e))
    }

    fn eval_symlinks(&self, name: &str) -> VfsResult<String> {
        Err(self.denied("evalsymlinks", name))
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        self.inner.readlink(&self.to_base(name)).map_err(|e| self.rewrite(e))
    }

    fn chmod(&self, name: &str, mode: Mode) -> VfsResult<()> {
        self.inner.chmod(&self.to_base(name), mode).map_err(|e| self.rewrite(e))
    }

    fn chown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        self.inner.chown(&self.to_base(name), uid, gid).map_err(|e| self.rewrite(e))
    }

    fn lchown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        self.inner
            .lchown(&self.to_base(name), uid, gid)
            .map_err(|e| self.rewrite(e))
    }

    fn chtimes(&self, name: &str, atime_ns: i64, mtime_ns: i64) -> VfsResult<()> {
        self.inner
            .chtimes(&self.to_base(name), atime_ns, mtime_ns)
            .map_err(|e| self.rewrite(e))
    }

    fn chdir(&self, dir: &str) -> VfsResult<()> {
        let target = self.to_base(dir);
        let info = self.inner.stat(&target).map_err(|e| self.rewrite(e))?;
        if !info.is_dir() {
            return Err(VfsError::path(
                "chdir",
                dir,
                ErrorKind::NotADirectory,
                self.inner.os_type(),
            ));
        }
        let family = self.inner.os_type();
        let cwd = self.cwd.read().unwrap().clone();
        *self.cwd.write().unwrap() = path::abs(dir, &cwd, family);
        Ok(())
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok(self.cwd.read().unwrap().clone())
    }

    fn truncate(&self, name: &str, size: u64) -> VfsResult<()> {
        self.inner.truncate(&self.to_base(name), size).map_err(|e| self.rewrite(e))
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        self.inner
            .link(&self.to_base(old), &self.to_base(new))
            .map_err(|e| self.rewrite(e))
    }

    fn symlink(&self, old: &str, new: &str) -> VfsResult<()> {
        let _ = old;
        Err(self.denied("symlink", new))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        self.inner.remove(&self.to_base(name)).map_err(|e| self.rewrite(e))
    }

    fn remove_all(&self, path_: &str) -> VfsResult<()> {
        self.inner.remove_all(&self.to_base(path_)).map_err(|e| self.rewrite(e))
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        self.inner
            .rename(&self.to_base(old), &self.to_base(new))
            .map_err(|e| self.rewrite(e))
    }

    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>> {
        self.inner.read_dir(&self.to_base(name)).map_err(|e| self.rewrite(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemfsBuilder;

    fn jailed() -> BasePathFS {
        let inner: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        inner.mkdir_all("/jail/sub", 0o755).unwrap();
        inner.write_file("/jail/outside-marker", b"x", 0o644).unwrap();
        BasePathFS::new(inner, "/jail").unwrap()
    }

    #[test]
    fn paths_are_clamped_under_base() {
        let fs = jailed();
        fs.mkdir("/sub/child", 0o755).unwrap();
        assert!(fs.stat("/sub/child").unwrap().is_dir());
    }

    #[test]
    fn climbing_above_root_is_clamped_not_an_error() {
        let fs = jailed();
        // `../../etc` from `/` still resolves inside the jail root.
        let info = fs.stat("/../../sub").unwrap();
        assert!(info.is_dir());
    }

    #[test]
    fn errors_are_reported_in_outer_coordinates() {
        let fs = jailed();
        let err = fs.stat("/nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
        assert!(err.to_string().contains("/nope"));
        assert!(!err.to_string().contains("/jail"));
    }

    #[test]
    fn sub_is_still_clamped_to_its_own_root() {
        let fs = jailed();
        let sub = fs.sub("/sub").unwrap();
        assert!(sub.stat("/").unwrap().is_dir());
        sub.write_file("/f", b"hi", 0o644).unwrap();
        assert_eq!(fs.read_file("/sub/f").unwrap(), b"hi");
        // the jail's outside-marker, above `/sub`, is unreachable from the sub-fs.
        assert_eq!(sub.stat("/outside-marker").unwrap_err().kind(), ErrorKind::NotExist);
    }

    #[test]
    fn symlink_and_evalsymlinks_are_refused() {
        let fs = jailed();
        assert_eq!(fs.symlink("/sub", "/link").unwrap_err().kind(), ErrorKind::OpNotPermitted);
        assert_eq!(fs.eval_symlinks("/sub").unwrap_err().kind(), ErrorKind::OpNotPermitted);
    }
}
