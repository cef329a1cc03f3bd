//! `MountFS` (§4.6): a union of `Vfs` instances keyed by absolute mount
//! point, resolved by longest-prefix match. One mount, at the path
//! separator, is always present and can't be unmounted.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::IdentityManager;
use crate::path;
use crate::perm::{Gid, Mode, Uid};
use crate::vfs_trait::{DirEntry, FileInfo, Features, OpenFlags, Vfs, VfsFile};

struct Mount {
    mount_point: String,
    /// The subtree of `fs`'s own namespace exposed at `mount_point`.
    base_path: String,
    fs: Arc<dyn Vfs>,
}

pub struct MountFS {
    mounts: RwLock<Vec<Mount>>,
    cwd: RwLock<String>,
}

impl MountFS {
    pub fn new(root: Arc<dyn Vfs>) -> Self {
        let sep = root.os_type().path_separator().to_string();
        Self {
            mounts: RwLock::new(vec![Mount {
                mount_point: sep.clone(),
                base_path: sep.clone(),
                fs: root,
            }]),
            cwd: RwLock::new(sep),
        }
    }

    fn family(&self) -> OsFamily {
        self.mounts.read().unwrap()[0].fs.os_type()
    }

    fn sep(&self) -> String {
        self.family().path_separator().to_string()
    }

    /// Mounts `fs` at `mount_point`, an absolute path on this `MountFS`'s own
    /// namespace, exposing `fs`'s own subtree rooted at `base_path`.
    pub fn mount(&self, mount_point: &str, base_path: &str, fs: Arc<dyn Vfs>) -> VfsResult<()> {
        let family = self.family();
        let mount_point = path::clean(mount_point, family);
        let base_path = fs.clean(base_path);
        let info = fs.stat(&base_path)?;
        if !info.is_dir() {
            return Err(VfsError::path("mount", &base_path, ErrorKind::NotADirectory, fs.os_type()));
        }
        let mut mounts = self.mounts.write().unwrap();
        if mounts.iter().any(|m| m.mount_point == mount_point) {
            return Err(VfsError::path("mount", &mount_point, ErrorKind::FileExists, family));
        }
        mounts.push(Mount {
            mount_point,
            base_path,
            fs,
        });
        mounts.sort_by(|a, b| b.mount_point.len().cmp(&a.mount_point.len()));
        Ok(())
    }

    pub fn unmount(&self, mount_point: &str) -> VfsResult<()> {
        let family = self.family();
        let cleaned = path::clean(mount_point, family);
        if cleaned == self.sep() {
            return Err(VfsError::path("unmount", mount_point, ErrorKind::OpNotPermitted, family));
        }
        let mut mounts = self.mounts.write().unwrap();
        let before = mounts.len();
        mounts.retain(|m| m.mount_point != cleaned);
        if mounts.len() == before {
            return Err(VfsError::path("unmount", mount_point, ErrorKind::NotExist, family));
        }
        Ok(())
    }

    fn is_prefix(&self, mount_point: &str, abs: &str) -> bool {
        if mount_point == self.sep() {
            return true;
        }
        abs == mount_point || abs.starts_with(&format!("{mount_point}{}", self.sep()))
    }

    fn strip_prefix(&self, mount_point: &str, abs: &str) -> String {
        if mount_point == self.sep() {
            return abs.to_string();
        }
        let rest = &abs[mount_point.len()..];
        if rest.is_empty() {
            self.sep()
        } else {
            rest.to_string()
        }
    }

    /// The path on `fs`'s own namespace that `relative` (already stripped of
    /// the mount point) corresponds to, anchored under `base_path`.
    fn to_inner(&self, base_path: &str, relative: &str) -> String {
        if base_path == self.sep() {
            relative.to_string()
        } else {
            format!("{base_path}{relative}")
        }
    }

    /// The reverse of `to_inner`: strips `base_path` from a path already on
    /// `fs`'s own namespace, leaving the mount-relative remainder.
    fn from_inner(&self, base_path: &str, inner: &str) -> String {
        if base_path == self.sep() {
            return inner.to_string();
        }
        let rest = inner.strip_prefix(base_path).unwrap_or(inner);
        if rest.is_empty() {
            self.sep()
        } else {
            rest.to_string()
        }
    }

    /// Longest-prefix match against the mount table. Returns the matched
    /// fs, its mount point, its base path, and the resolved path on the
    /// fs's own namespace.
    fn locate(&self, outer_path: &str) -> (Arc<dyn Vfs>, String, String, String) {
        let family = self.family();
        let cwd = self.cwd.read().unwrap().clone();
        let abs = path::abs(outer_path, &cwd, family);
        let mounts = self.mounts.read().unwrap();
        for m in mounts.iter() {
            if self.is_prefix(&m.mount_point, &abs) {
                let relative = self.strip_prefix(&m.mount_point, &abs);
                let inner = self.to_inner(&m.base_path, &relative);
                return (m.fs.clone(), m.mount_point.clone(), m.base_path.clone(), inner);
            }
        }
        unreachable!("the root mount always matches")
    }

    fn current(&self) -> Arc<dyn Vfs> {
        let cwd = self.cwd.read().unwrap().clone();
        self.locate(&cwd).0
    }

    fn rewrite(&self, err: VfsError, mount_point: &str, base_path: &str) -> VfsError {
        let sep = self.sep();
        let mount_point = mount_point.to_string();
        let base_path = base_path.to_string();
        err.map_paths(move |inner_path| {
            let inner_str = inner_path.to_string_lossy();
            let relative = if base_path == sep {
                inner_str.to_string()
            } else {
                let rest = inner_str.strip_prefix(base_path.as_str()).unwrap_or(&inner_str);
                if rest.is_empty() { sep.clone() } else { rest.to_string() }
            };
            if mount_point == sep {
                PathBuf::from(relative)
            } else {
                PathBuf::from(format!("{mount_point}{relative}"))
            }
        })
    }
}

impl Vfs for MountFS {
    fn features(&self) -> Features {
        self.current().features()
    }

    fn os_type(&self) -> OsFamily {
        self.family()
    }

    fn name(&self) -> String {
        "MountFS".to_string()
    }

    fn vfs_type(&self) -> &'static str {
        "mountfs"
    }

    fn umask(&self) -> Mode {
        self.current().umask()
    }

    fn set_umask(&self, mask: Mode) {
        self.current().set_umask(mask);
    }

    fn user(&self) -> String {
        self.current().user()
    }

    fn set_user(&self, name: &str) -> VfsResult<()> {
        self.current().set_user(name)
    }

    fn idm(&self) -> Arc<dyn IdentityManager> {
        self.current().idm()
    }

    fn sub(&self, dir: &str) -> VfsResult<Arc<dyn Vfs>> {
        let (fs, _, _, inner) = self.locate(dir);
        fs.sub(&inner)
    }

    fn mkdir(&self, name: &str, perm: Mode) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.mkdir(&inner, perm).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn mkdir_all(&self, path_: &str, perm: Mode) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(path_);
        fs.mkdir_all(&inner, perm).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: Mode) -> VfsResult<Box<dyn VfsFile>> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.open_file(&inner, flags, perm).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.stat(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn lstat(&self, name: &str) -> VfsResult<FileInfo> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.lstat(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn eval_symlinks(&self, name: &str) -> VfsResult<String> {
        let (fs, mp, bp, inner) = self.locate(name);
        let resolved = fs.eval_symlinks(&inner).map_err(|e| self.rewrite(e, &mp, &bp))?;
        let relative = self.from_inner(&bp, &resolved);
        if mp == self.sep() {
            Ok(relative)
        } else {
            Ok(format!("{mp}{relative}"))
        }
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.readlink(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn chmod(&self, name: &str, mode: Mode) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.chmod(&inner, mode).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn chown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.chown(&inner, uid, gid).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn lchown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.lchown(&inner, uid, gid).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn chtimes(&self, name: &str, atime_ns: i64, mtime_ns: i64) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.chtimes(&inner, atime_ns, mtime_ns).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn chdir(&self, dir: &str) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(dir);
        let info = fs.stat(&inner).map_err(|e| self.rewrite(e, &mp, &bp))?;
        if !info.is_dir() {
            return Err(VfsError::path("chdir", dir, ErrorKind::NotADirectory, self.family()));
        }
        let family = self.family();
        let cwd = self.cwd.read().unwrap().clone();
        *self.cwd.write().unwrap() = path::abs(dir, &cwd, family);
        Ok(())
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok(self.cwd.read().unwrap().clone())
    }

    fn truncate(&self, name: &str, size: u64) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.truncate(&inner, size).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let (old_fs, old_mp, old_bp, old_inner) = self.locate(old);
        let (new_fs, _, _, new_inner) = self.locate(new);
        if !Arc::ptr_eq(&old_fs, &new_fs) {
            return Err(VfsError::link("link", old, new, ErrorKind::CrossDeviceLink, self.family()));
        }
        old_fs
            .link(&old_inner, &new_inner)
            .map_err(|e| self.rewrite(e, &old_mp, &old_bp))
    }

    fn symlink(&self, old: &str, new: &str) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(new);
        fs.symlink(old, &inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.remove(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn remove_all(&self, path_: &str) -> VfsResult<()> {
        let (fs, mp, bp, inner) = self.locate(path_);
        fs.remove_all(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let (old_fs, old_mp, old_bp, old_inner) = self.locate(old);
        let (new_fs, _, _, new_inner) = self.locate(new);
        if !Arc::ptr_eq(&old_fs, &new_fs) {
            return Err(VfsError::link("rename", old, new, ErrorKind::CrossDeviceLink, self.family()));
        }
        old_fs
            .rename(&old_inner, &new_inner)
            .map_err(|e| self.rewrite(e, &old_mp, &old_bp))
    }

    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>> {
        let (fs, mp, bp, inner) = self.locate(name);
        fs.read_dir(&inner).map_err(|e| self.rewrite(e, &mp, &bp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemfsBuilder;

    fn two_mount_fs() -> MountFS {
        let root: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        root.mkdir("/mnt", 0o755).unwrap();
        let usb: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        let mfs = MountFS::new(root);
        mfs.mount("/mnt", "/", usb).unwrap();
        mfs
    }

    #[test]
    fn longest_prefix_wins() {
        let mfs = two_mount_fs();
        mfs.write_file("/mnt/f", b"usb", 0o644).unwrap();
        mfs.write_file("/g", b"root", 0o644).unwrap();
        assert_eq!(mfs.read_file("/mnt/f").unwrap(), b"usb");
        assert_eq!(mfs.read_file("/g").unwrap(), b"root");
    }

    #[test]
    fn mount_can_anchor_a_subtree_of_the_inner_fs() {
        let root: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        root.mkdir("/mnt", 0o755).unwrap();
        let usb: Arc<dyn Vfs> = Arc::new(MemfsBuilder::new().build());
        usb.mkdir_all("/export/share", 0o755).unwrap();
        usb.write_file("/export/share/f", b"shared", 0o644).unwrap();
        let mfs = MountFS::new(root);
        mfs.mount("/mnt", "/export/share", usb).unwrap();
        assert_eq!(mfs.read_file("/mnt/f").unwrap(), b"shared");
        assert!(mfs.stat("/mnt").unwrap().is_dir());
        // `/export` on `usb` sits above the anchored base path and is not
        // reachable through the mount.
        let err = mfs.stat("/mnt/share").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
    }

    #[test]
    fn cross_mount_rename_is_cross_device_link() {
        let mfs = two_mount_fs();
        mfs.write_file("/g", b"root", 0o644).unwrap();
        let err = mfs.rename("/g", "/mnt/g").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossDeviceLink);
    }

    #[test]
    fn chdir_switches_the_current_mount() {
        let mfs = two_mount_fs();
        assert_eq!(mfs.getwd().unwrap(), "/");
        mfs.chdir("/mnt").unwrap();
        assert_eq!(mfs.getwd().unwrap(), "/mnt");
    }

    #[test]
    fn unmounting_the_root_is_refused() {
        let mfs = two_mount_fs();
        assert_eq!(mfs.unmount("/").unwrap_err().kind(), ErrorKind::OpNotPermitted);
        assert!(mfs.unmount("/mnt").is_ok());
    }

    #[test]
    fn sub_delegates_to_the_matched_mount() {
        let mfs = two_mount_fs();
        mfs.write_file("/mnt/f", b"usb", 0o644).unwrap();
        let sub = mfs.sub("/mnt").unwrap();
        assert_eq!(sub.read_file("/f").unwrap(), b"usb");
    }
}
