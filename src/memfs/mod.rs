//! `MemFS`: the in-memory filesystem core (§4.2) built on the node model,
//! the resolver, and `MemFile`.

pub mod file;
pub mod node;
pub mod resolver;
pub mod volume;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::{IdentityManager, InMemoryIdm, UserRecord};
use crate::path;
use crate::perm::{
    check_access, is_owner_or_admin, require_access, Access, AccessProfile, Gid, Mode, Uid,
    ROOT_GID, ROOT_UID,
};
use crate::vfs_trait::{DirEntry, FileInfo, FileKind, Features, OpenFlags, OpenMode, Vfs, VfsFile};

use file::MemFile;
use node::{Node, NodeKind};
use resolver::{Policy, ResolveError};
use volume::VolumeTable;

pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn resolve_err_to_vfs(err: ResolveError, op: &'static str, path: &str, family: OsFamily) -> VfsError {
    let kind = match err {
        ResolveError::NotExist => ErrorKind::NotExist,
        ResolveError::NotADirectory => ErrorKind::NotADirectory,
        ResolveError::PermissionDenied => ErrorKind::PermissionDenied,
        ResolveError::TooManySymlinks => ErrorKind::TooManySymlinks,
    };
    VfsError::path(op, path, kind, family)
}

/// Builder for [`MemFS`], covering OS family, default modes, initial
/// umask, and the identity manager to plug in.
pub struct MemfsBuilder {
    family: OsFamily,
    idm: Option<Arc<dyn IdentityManager>>,
    name: String,
    default_dir_mode: Mode,
    default_file_mode: Mode,
    umask: Mode,
    windows_volume: Option<String>,
}

impl Default for MemfsBuilder {
    fn default() -> Self {
        Self {
            family: OsFamily::Linux,
            idm: None,
            name: "MemFS".to_string(),
            default_dir_mode: 0o755,
            default_file_mode: 0o644,
            umask: 0o022,
            windows_volume: None,
        }
    }
}

impl MemfsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn family(mut self, family: OsFamily) -> Self {
        self.family = family;
        self
    }

    pub fn idm(mut self, idm: Arc<dyn IdentityManager>) -> Self {
        self.idm = Some(idm);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn default_dir_mode(mut self, mode: Mode) -> Self {
        self.default_dir_mode = mode;
        self
    }

    pub fn default_file_mode(mut self, mode: Mode) -> Self {
        self.default_file_mode = mode;
        self
    }

    pub fn umask(mut self, mask: Mode) -> Self {
        self.umask = mask;
        self
    }

    /// Selects Windows family and the default volume name (e.g. `"C:"`).
    pub fn windows_volume(mut self, name: impl Into<String>) -> Self {
        self.family = OsFamily::Windows;
        self.windows_volume = Some(name.into());
        self
    }

    pub fn build(self) -> MemFS {
        let now = now_ns();
        let idm = self.idm.unwrap_or_else(|| Arc::new(InMemoryIdm::default()));
        let (volumes, default_volume_name) = match self.family {
            OsFamily::Windows => {
                let vol_name = self.windows_volume.unwrap_or_else(|| "C:".to_string());
                let table =
                    VolumeTable::windows_default(&vol_name, self.default_dir_mode, ROOT_UID, ROOT_GID, now);
                (table, vol_name)
            }
            OsFamily::Linux | OsFamily::Darwin => {
                let root = Node::new_dir(self.default_dir_mode, ROOT_UID, ROOT_GID, now);
                (VolumeTable::single(root), String::new())
            }
        };
        let default_anchor = volumes.default_root();
        debug!("built a MemFS ({:?}-family) rooted at {:?}", self.family, default_volume_name);
        MemFS {
            family: self.family,
            volumes: Arc::new(RwLock::new(volumes)),
            default_volume_name,
            default_anchor,
            idm: idm.clone(),
            user: RwLock::new(UserRecord {
                uid: ROOT_UID,
                name: "root".to_string(),
                gid: ROOT_GID,
            }),
            cwd: Arc::new(RwLock::new(path::path_separator(self.family).to_string())),
            umask: AtomicU32::new(self.umask),
            default_dir_mode: self.default_dir_mode,
            default_file_mode: self.default_file_mode,
            name: self.name,
        }
    }
}

/// The in-memory filesystem core.
pub struct MemFS {
    family: OsFamily,
    volumes: Arc<RwLock<VolumeTable>>,
    default_volume_name: String,
    default_anchor: Arc<Node>,
    idm: Arc<dyn IdentityManager>,
    user: RwLock<UserRecord>,
    cwd: Arc<RwLock<String>>,
    umask: AtomicU32,
    default_dir_mode: Mode,
    default_file_mode: Mode,
    name: String,
}

struct Resolved {
    parent: Arc<Node>,
    child: Option<Arc<Node>>,
    name: String,
    resolved_path: String,
}

impl MemFS {
    fn anchor_for(&self, volume: &str) -> Option<Arc<Node>> {
        if volume.is_empty() || volume.eq_ignore_ascii_case(&self.default_volume_name) {
            Some(self.default_anchor.clone())
        } else {
            self.volumes.read().unwrap().root_of(volume)
        }
    }

    fn current_profile(&self) -> AccessProfile {
        let rec = self.user.read().unwrap();
        AccessProfile::new(rec.uid, rec.gid)
    }

    fn effective_mode(&self, requested: Mode) -> Mode {
        requested & 0o7777 & !self.umask.load(Ordering::Relaxed)
    }

    fn resolve(&self, op: &'static str, input: &str, policy: Policy) -> VfsResult<Resolved> {
        let cwd = self.cwd.read().unwrap().clone();
        let absolute = path::abs(input, &cwd, self.family);
        let vol = path::volume_name(&absolute, self.family).to_string();
        let rest = absolute[vol.len()..].to_string();
        let Some(anchor) = self.anchor_for(&vol) else {
            return Err(VfsError::path(op, input, ErrorKind::NotExist, self.family));
        };
        let profile = self.current_profile();
        let raw = resolver::resolve(&anchor, &rest, policy, &profile, self.family)
            .map_err(|e| resolve_err_to_vfs(e, op, input, self.family))?;
        trace!("{op} {input} -> resolved {:?}", raw.resolved_path);
        Ok(Resolved {
            parent: raw.parent,
            child: raw.child,
            name: raw.name,
            resolved_path: raw.resolved_path,
        })
    }

    fn check_write(&self, dir: &Arc<Node>, op: &'static str, path_: &str) -> VfsResult<()> {
        let profile = self.current_profile();
        let (mode, uid, gid) = {
            let data = dir.read();
            (data.mode, data.uid, data.gid)
        };
        require_access(&profile, mode, uid, gid, Access::Write, op, path_, self.family)
    }

    fn check_execute(&self, dir: &Arc<Node>, op: &'static str, path_: &str) -> VfsResult<()> {
        let profile = self.current_profile();
        let (mode, uid, gid) = {
            let data = dir.read();
            (data.mode, data.uid, data.gid)
        };
        require_access(&profile, mode, uid, gid, Access::Execute, op, path_, self.family)
    }

    fn remove_subtree(&self, node: &Arc<Node>, profile: &AccessProfile, op: &'static str, path_: &str) -> VfsResult<()> {
        let (is_dir, mode, uid, gid) = {
            let data = node.read();
            (matches!(data.kind, NodeKind::Dir(_)), data.mode, data.uid, data.gid)
        };
        if !is_dir {
            if let NodeKind::File(f) = &mut node.write().kind {
                f.nlink = f.nlink.saturating_sub(1);
            }
            return Ok(());
        }
        require_access(profile, mode, uid, gid, Access::Write, op, path_, self.family)?;
        let children: Vec<Arc<Node>> = match &node.read().kind {
            NodeKind::Dir(m) => m.values().cloned().collect(),
            _ => Vec::new(),
        };
        for child in &children {
            self.remove_subtree(child, profile, op, path_)?;
        }
        if let NodeKind::Dir(m) = &mut node.write().kind {
            m.clear();
        }
        Ok(())
    }

    /// `Sub(dir)` (§4.2): a new `MemFS` rooted at the resolved directory,
    /// sharing the subtree but with independent cwd and user state (§9
    /// open question, resolved).
    pub fn sub(&self, dir: &str) -> VfsResult<MemFS> {
        let r = self.resolve("sub", dir, Policy::Eval)?;
        let child = r.child.ok_or_else(|| VfsError::path("sub", dir, ErrorKind::NotExist, self.family))?;
        if !child.is_dir() {
            return Err(VfsError::path("sub", dir, ErrorKind::NotADirectory, self.family));
        }
        Ok(MemFS {
            family: self.family,
            volumes: self.volumes.clone(),
            default_volume_name: self.default_volume_name.clone(),
            default_anchor: child,
            idm: self.idm.clone(),
            user: RwLock::new(self.user.read().unwrap().clone()),
            cwd: Arc::new(RwLock::new(path::path_separator(self.family).to_string())),
            umask: AtomicU32::new(self.umask.load(Ordering::Relaxed)),
            default_dir_mode: self.default_dir_mode,
            default_file_mode: self.default_file_mode,
            name: self.name.clone(),
        })
    }
}

impl Vfs for MemFS {
    fn features(&self) -> Features {
        Features::IDENTITY_MGR
            | Features::HARDLINK
            | Features::SYMLINK
            | Features::CHROOT
            | Features::SYSTEM_DIRS
            | Features::SUB_FS
    }

    fn os_type(&self) -> OsFamily {
        self.family
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn vfs_type(&self) -> &'static str {
        "memfs"
    }

    fn umask(&self) -> Mode {
        self.umask.load(Ordering::Relaxed)
    }

    fn set_umask(&self, mask: Mode) {
        self.umask.store(mask & 0o777, Ordering::Relaxed);
    }

    fn user(&self) -> String {
        self.user.read().unwrap().name.clone()
    }

    fn set_user(&self, name: &str) -> VfsResult<()> {
        let record = self
            .idm
            .lookup_user(name)
            .map_err(|_| VfsError::path("setuser", name, ErrorKind::InvalidName, self.family))?;
        *self.user.write().unwrap() = record;
        Ok(())
    }

    fn idm(&self) -> Arc<dyn IdentityManager> {
        self.idm.clone()
    }

    fn sub(&self, dir: &str) -> VfsResult<Arc<dyn Vfs>> {
        Ok(Arc::new(MemFS::sub(self, dir)?))
    }

    fn mkdir(&self, name: &str, perm: Mode) -> VfsResult<()> {
        let r = self.resolve("mkdir", name, Policy::Eval)?;
        if r.child.is_some() {
            return Err(VfsError::path("mkdir", name, ErrorKind::FileExists, self.family));
        }
        self.check_write(&r.parent, "mkdir", name)?;
        self.check_execute(&r.parent, "mkdir", name)?;
        let profile = self.current_profile();
        let mode = self.effective_mode(perm);
        let new_dir = Node::new_dir(mode, profile.uid, profile.gid, now_ns());
        if let NodeKind::Dir(children) = &mut r.parent.write().kind {
            children.insert(r.name.clone(), new_dir);
        }
        Ok(())
    }

    fn mkdir_all(&self, path_: &str, perm: Mode) -> VfsResult<()> {
        let cwd = self.cwd.read().unwrap().clone();
        let absolute = path::abs(path_, &cwd, self.family);
        let cleaned = path::clean(&absolute, self.family);
        let vol = path::volume_name(&cleaned, self.family).to_string();
        let rest = cleaned[vol.len()..].to_string();
        let Some(anchor) = self.anchor_for(&vol) else {
            return Err(VfsError::path("mkdirall", path_, ErrorKind::NotExist, self.family));
        };
        let mut current = anchor;
        let profile = self.current_profile();
        let mode = self.effective_mode(perm);
        for comp in rest
            .split(|c| path::is_path_separator(c, self.family))
            .filter(|c| !c.is_empty())
        {
            let existing = match &current.read().kind {
                NodeKind::Dir(children) => children.get(comp).cloned(),
                _ => return Err(VfsError::path("mkdirall", path_, ErrorKind::NotADirectory, self.family)),
            };
            current = match existing {
                Some(node) => {
                    if !node.is_dir() {
                        return Err(VfsError::path("mkdirall", path_, ErrorKind::NotADirectory, self.family));
                    }
                    node
                }
                None => {
                    let (m, u, g) = {
                        let data = current.read();
                        (data.mode, data.uid, data.gid)
                    };
                    require_access(&profile, m, u, g, Access::Write, "mkdirall", path_, self.family)?;
                    let new_dir = Node::new_dir(mode, profile.uid, profile.gid, now_ns());
                    if let NodeKind::Dir(children) = &mut current.write().kind {
                        children.insert(comp.to_string(), new_dir.clone());
                    }
                    new_dir
                }
            };
        }
        Ok(())
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: Mode) -> VfsResult<Box<dyn VfsFile>> {
        let open_mode = flags.decode();
        let r = self.resolve("openfile", name, Policy::Eval)?;
        let profile = self.current_profile();

        let node = match &r.child {
            None => {
                if !open_mode.contains(OpenMode::CREATE) {
                    return Err(VfsError::path("openfile", name, ErrorKind::NotExist, self.family));
                }
                self.check_write(&r.parent, "openfile", name)?;
                let file_mode = self.effective_mode(perm);
                let new_file = Node::new_file(file_mode, profile.uid, profile.gid, now_ns());
                if let NodeKind::Dir(children) = &mut r.parent.write().kind {
                    children.insert(r.name.clone(), new_file.clone());
                }
                new_file
            }
            Some(existing) => match existing.kind_tag() {
                FileKind::Dir => {
                    if open_mode.contains(OpenMode::WRITE) {
                        return Err(VfsError::path("openfile", name, ErrorKind::IsADirectory, self.family));
                    }
                    existing.clone()
                }
                FileKind::File => {
                    if open_mode.contains(OpenMode::CREATE_EXCL) {
                        return Err(VfsError::path("openfile", name, ErrorKind::FileExists, self.family));
                    }
                    let (m, u, g) = {
                        let data = existing.read();
                        (data.mode, data.uid, data.gid)
                    };
                    if open_mode.contains(OpenMode::READ) && !check_access(&profile, m, u, g, Access::Read) {
                        return Err(VfsError::path("openfile", name, ErrorKind::PermissionDenied, self.family));
                    }
                    if open_mode.contains(OpenMode::WRITE) && !check_access(&profile, m, u, g, Access::Write) {
                        return Err(VfsError::path("openfile", name, ErrorKind::PermissionDenied, self.family));
                    }
                    if open_mode.contains(OpenMode::TRUNCATE) {
                        if let NodeKind::File(f) = &mut existing.write().kind {
                            f.data.clear();
                        }
                    }
                    existing.clone()
                }
                FileKind::Symlink => existing.clone(),
            },
        };

        let initial_offset = if open_mode.contains(OpenMode::APPEND) {
            node.size()
        } else {
            0
        };
        Ok(Box::new(MemFile::new(
            node,
            name.to_string(),
            open_mode,
            self.family,
            profile,
            initial_offset,
            self.cwd.clone(),
            r.resolved_path,
        )))
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo> {
        let r = self.resolve("stat", name, Policy::Stat)?;
        let child = r.child.ok_or_else(|| VfsError::path("stat", name, ErrorKind::NotExist, self.family))?;
        Ok(child.to_file_info(&r.name))
    }

    fn lstat(&self, name: &str) -> VfsResult<FileInfo> {
        let r = self.resolve("lstat", name, Policy::Lstat)?;
        let child = r.child.ok_or_else(|| VfsError::path("lstat", name, ErrorKind::NotExist, self.family))?;
        Ok(child.to_file_info(&r.name))
    }

    fn eval_symlinks(&self, name: &str) -> VfsResult<String> {
        let r = self.resolve("evalsymlinks", name, Policy::Eval)?;
        if r.child.is_none() {
            return Err(VfsError::path("evalsymlinks", name, ErrorKind::NotExist, self.family));
        }
        Ok(r.resolved_path)
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        let r = self.resolve("readlink", name, Policy::Lstat)?;
        let child = r.child.ok_or_else(|| VfsError::path("readlink", name, ErrorKind::NotExist, self.family))?;
        match &child.read().kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(VfsError::path("readlink", name, ErrorKind::InvalidArgument, self.family)),
        }
    }

    fn chmod(&self, name: &str, mode: Mode) -> VfsResult<()> {
        let r = self.resolve("chmod", name, Policy::Stat)?;
        let child = r.child.ok_or_else(|| VfsError::path("chmod", name, ErrorKind::NotExist, self.family))?;
        let profile = self.current_profile();
        let mut data = child.write();
        if !is_owner_or_admin(&profile, data.uid) {
            return Err(VfsError::path("chmod", name, ErrorKind::PermissionDenied, self.family));
        }
        data.mode = (data.mode & !0o7777) | (mode & 0o7777);
        Ok(())
    }

    fn chown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        if self.family == OsFamily::Windows {
            return Err(VfsError::path("chown", name, ErrorKind::OpNotPermitted, self.family));
        }
        let r = self.resolve("chown", name, Policy::Stat)?;
        let child = r.child.ok_or_else(|| VfsError::path("chown", name, ErrorKind::NotExist, self.family))?;
        if !self.current_profile().is_admin() {
            return Err(VfsError::path("chown", name, ErrorKind::OpNotPermitted, self.family));
        }
        let mut data = child.write();
        data.uid = uid;
        data.gid = gid;
        Ok(())
    }

    fn lchown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()> {
        if self.family == OsFamily::Windows {
            return Err(VfsError::path("lchown", name, ErrorKind::OpNotPermitted, self.family));
        }
        let r = self.resolve("lchown", name, Policy::Lstat)?;
        let child = r.child.ok_or_else(|| VfsError::path("lchown", name, ErrorKind::NotExist, self.family))?;
        if !self.current_profile().is_admin() {
            return Err(VfsError::path("lchown", name, ErrorKind::OpNotPermitted, self.family));
        }
        let mut data = child.write();
        data.uid = uid;
        data.gid = gid;
        Ok(())
    }

    fn chtimes(&self, name: &str, _atime_ns: i64, mtime_ns: i64) -> VfsResult<()> {
        let r = self.resolve("chtimes", name, Policy::Stat)?;
        let child = r.child.ok_or_else(|| VfsError::path("chtimes", name, ErrorKind::NotExist, self.family))?;
        let profile = self.current_profile();
        let mut data = child.write();
        if !is_owner_or_admin(&profile, data.uid) {
            return Err(VfsError::path("chtimes", name, ErrorKind::PermissionDenied, self.family));
        }
        data.mtime_ns = mtime_ns;
        Ok(())
    }

    fn chdir(&self, dir: &str) -> VfsResult<()> {
        let r = self.resolve("chdir", dir, Policy::Lstat)?;
        let child = r.child.ok_or_else(|| VfsError::path("chdir", dir, ErrorKind::NotExist, self.family))?;
        if !child.is_dir() {
            return Err(VfsError::path("chdir", dir, ErrorKind::NotADirectory, self.family));
        }
        self.check_execute(&child, "chdir", dir)?;
        *self.cwd.write().unwrap() = r.resolved_path;
        Ok(())
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok(self.cwd.read().unwrap().clone())
    }

    fn truncate(&self, name: &str, size: u64) -> VfsResult<()> {
        let r = self.resolve("truncate", name, Policy::Eval)?;
        let child = r.child.ok_or_else(|| VfsError::path("truncate", name, ErrorKind::NotExist, self.family))?;
        let mut data = child.write();
        match &mut data.kind {
            NodeKind::File(f) => f.data.resize(size as usize, 0),
            _ => return Err(VfsError::path("truncate", name, ErrorKind::IsADirectory, self.family)),
        }
        data.mtime_ns = now_ns();
        Ok(())
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let old_r = self.resolve("link", old, Policy::Lstat)?;
        let old_child = old_r
            .child
            .clone()
            .ok_or_else(|| VfsError::link("link", old, new, ErrorKind::NotExist, self.family))?;
        if !matches!(old_child.kind_tag(), FileKind::File) {
            return Err(VfsError::link("link", old, new, ErrorKind::OpNotPermitted, self.family));
        }
        let new_r = self.resolve("link", new, Policy::Lstat)?;
        if new_r.child.is_some() {
            return Err(VfsError::link("link", old, new, ErrorKind::FileExists, self.family));
        }
        let (mode, uid, gid) = {
            let data = new_r.parent.read();
            (data.mode, data.uid, data.gid)
        };
        let profile = self.current_profile();
        if !check_access(&profile, mode, uid, gid, Access::Write) {
            return Err(VfsError::link("link", old, new, ErrorKind::PermissionDenied, self.family));
        }
        if let NodeKind::File(f) = &mut old_child.write().kind {
            f.nlink += 1;
        }
        if let NodeKind::Dir(children) = &mut new_r.parent.write().kind {
            children.insert(new_r.name.clone(), old_child);
        }
        Ok(())
    }

    fn symlink(&self, old: &str, new: &str) -> VfsResult<()> {
        let new_r = self.resolve("symlink", new, Policy::Lstat)?;
        if new_r.child.is_some() {
            return Err(VfsError::link("symlink", old, new, ErrorKind::FileExists, self.family));
        }
        let (mode, uid, gid) = {
            let data = new_r.parent.read();
            (data.mode, data.uid, data.gid)
        };
        let profile = self.current_profile();
        if !check_access(&profile, mode, uid, gid, Access::Write) {
            return Err(VfsError::link("symlink", old, new, ErrorKind::PermissionDenied, self.family));
        }
        let target = path::clean(old, self.family);
        let link_node = Node::new_symlink(target, profile.uid, profile.gid, now_ns());
        if let NodeKind::Dir(children) = &mut new_r.parent.write().kind {
            children.insert(new_r.name.clone(), link_node);
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        let r = self.resolve("remove", name, Policy::Lstat)?;
        let child = r
            .child
            .clone()
            .ok_or_else(|| VfsError::path("remove", name, ErrorKind::NotExist, self.family))?;
        self.check_write(&r.parent, "remove", name)?;
        let non_empty = matches!(&child.read().kind, NodeKind::Dir(children) if !children.is_empty());
        if non_empty {
            return Err(VfsError::path("remove", name, ErrorKind::DirNotEmpty, self.family));
        }
        if let NodeKind::File(f) = &mut child.write().kind {
            f.nlink = f.nlink.saturating_sub(1);
        }
        if let NodeKind::Dir(children) = &mut r.parent.write().kind {
            children.remove(&r.name);
        }
        Ok(())
    }

    fn remove_all(&self, path_: &str) -> VfsResult<()> {
        if path_.is_empty() {
            return Ok(());
        }
        let r = match self.resolve("removeall", path_, Policy::Lstat) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::NotExist => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(child) = r.child.clone() else {
            return Ok(());
        };
        let profile = self.current_profile();
        self.remove_subtree(&child, &profile, "removeall", path_)?;
        if let NodeKind::Dir(children) = &mut r.parent.write().kind {
            children.remove(&r.name);
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let old_r = self.resolve("rename", old, Policy::Lstat)?;
        let new_r = self.resolve("rename", new, Policy::Lstat)?;

        if old_r.resolved_path == new_r.resolved_path && !old_r.resolved_path.is_empty() {
            return Ok(());
        }

        self.check_write(&old_r.parent, "rename", old)?;
        self.check_write(&new_r.parent, "rename", new)?;

        let src_node = old_r
            .child
            .clone()
            .ok_or_else(|| VfsError::link("rename", old, new, ErrorKind::NotExist, self.family))?;
        let src_is_dir = src_node.is_dir();

        if src_is_dir {
            if new_r.child.is_some() {
                return Err(VfsError::link("rename", old, new, ErrorKind::FileExists, self.family));
            }
        } else if let Some(dest_node) = &new_r.child {
            match &mut dest_node.write().kind {
                NodeKind::File(f) => f.nlink = f.nlink.saturating_sub(1),
                NodeKind::Dir(_) | NodeKind::Symlink(_) => {
                    return Err(VfsError::link("rename", old, new, ErrorKind::FileExists, self.family));
                }
            }
        }

        let same_parent = Arc::ptr_eq(&old_r.parent, &new_r.parent);
        if same_parent {
            if let NodeKind::Dir(children) = &mut old_r.parent.write().kind {
                children.remove(&old_r.name);
                children.insert(new_r.name.clone(), src_node);
            }
        } else {
            let old_ptr = Arc::as_ptr(&old_r.parent) as usize;
            let new_ptr = Arc::as_ptr(&new_r.parent) as usize;
            if old_ptr < new_ptr {
                let mut g1 = old_r.parent.write();
                let mut g2 = new_r.parent.write();
                if let NodeKind::Dir(children) = &mut g1.kind {
                    children.remove(&old_r.name);
                }
                if let NodeKind::Dir(children) = &mut g2.kind {
                    children.insert(new_r.name.clone(), src_node);
                }
            } else {
                let mut g2 = new_r.parent.write();
                let mut g1 = old_r.parent.write();
                if let NodeKind::Dir(children) = &mut g1.kind {
                    children.remove(&old_r.name);
                }
                if let NodeKind::Dir(children) = &mut g2.kind {
                    children.insert(new_r.name.clone(), src_node);
                }
            }
        }
        Ok(())
    }

    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>> {
        let r = self.resolve("readdir", name, Policy::Eval)?;
        let child = r.child.ok_or_else(|| VfsError::path("readdir", name, ErrorKind::NotExist, self.family))?;
        match &child.read().kind {
            NodeKind::Dir(children) => {
                let mut entries: Vec<DirEntry> = children
                    .iter()
                    .map(|(n, c)| DirEntry {
                        name: n.clone(),
                        kind: c.kind_tag(),
                    })
                    .collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            }
            _ => {
                warn!("readdir {name}: not a directory");
                Err(VfsError::path("readdir", name, ErrorKind::NotADirectory, self.family))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs_trait::AccessMode;

    fn new_fs() -> MemFS {
        MemfsBuilder::new().build()
    }

    #[test]
    fn create_then_read_file_round_trips() {
        let fs = new_fs();
        fs.mkdir("/tmp", 0o755).unwrap();
        fs.write_file("/tmp/a.txt", b"hello", 0o644).unwrap();
        let data = fs.read_file("/tmp/a.txt").unwrap();
        assert_eq!(data, b"hello");
        let info = fs.stat("/tmp/a.txt").unwrap();
        assert_eq!(info.size(), 5);
    }

    #[test]
    fn symlink_resolution_scenario() {
        let fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.write_file("/d/f", b"x", 0o644).unwrap();
        fs.symlink("/d/f", "/l").unwrap();
        assert_eq!(fs.stat("/l").unwrap().size(), 1);
        assert!(fs.lstat("/l").unwrap().is_symlink());
        assert_eq!(fs.readlink("/l").unwrap(), "/d/f");
        assert_eq!(fs.eval_symlinks("/l").unwrap(), "/d/f");
    }

    #[test]
    fn symlink_loop_reports_too_many_symlinks() {
        let fs = new_fs();
        fs.symlink("/b", "/a").unwrap();
        fs.symlink("/a", "/b").unwrap();
        let err = fs.stat("/a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManySymlinks);
    }

    #[test]
    fn hard_link_shares_data_until_both_unlinked() {
        let fs = new_fs();
        fs.write_file("/f", b"ab", 0o644).unwrap();
        fs.link("/f", "/g").unwrap();
        {
            let g = fs.open_file("/g", OpenFlags { access: AccessMode::ReadWrite, extra: crate::vfs_trait::OpenExtra::empty() }, 0).unwrap();
            g.truncate(1).unwrap();
        }
        assert_eq!(fs.read_file("/f").unwrap(), b"a");
        fs.remove("/f").unwrap();
        assert_eq!(fs.read_file("/g").unwrap(), b"a");
        fs.remove("/g").unwrap();
        assert_eq!(fs.stat("/g").unwrap_err().kind(), ErrorKind::NotExist);
    }

    #[test]
    fn mkdir_all_is_idempotent() {
        let fs = new_fs();
        fs.mkdir_all("/a/b/c", 0o755).unwrap();
        fs.mkdir_all("/a/b/c", 0o755).unwrap();
        assert!(fs.stat("/a/b/c").unwrap().is_dir());
    }

    #[test]
    fn remove_requires_empty_directory() {
        let fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.write_file("/d/x", b"1", 0o644).unwrap();
        assert_eq!(fs.remove("/d").unwrap_err().kind(), ErrorKind::DirNotEmpty);
        fs.remove("/d/x").unwrap();
        fs.remove("/d").unwrap();
    }

    #[test]
    fn remove_all_recursively_deletes() {
        let fs = new_fs();
        fs.mkdir_all("/a/b", 0o755).unwrap();
        fs.write_file("/a/b/x", b"1", 0o644).unwrap();
        fs.remove_all("/a").unwrap();
        assert_eq!(fs.stat("/a").unwrap_err().kind(), ErrorKind::NotExist);
        fs.remove_all("/a").unwrap(); // already gone: no-op
    }

    #[test]
    fn sub_has_independent_cwd() {
        let fs = new_fs();
        fs.mkdir_all("/a/b", 0o755).unwrap();
        fs.chdir("/a").unwrap();
        let sub = fs.sub("/a/b").unwrap();
        assert_eq!(sub.getwd().unwrap(), "/");
        assert_eq!(fs.getwd().unwrap(), "/a");
    }
}
