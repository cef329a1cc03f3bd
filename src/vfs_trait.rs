//! The abstract VFS surface every backend and decorator implements.
//!
//! Nothing in this module is "hard engineering" in its own right — it is
//! the external contract the core (MemFS) and the three decorators all
//! honour, plus a handful of tree/temp helpers built once, in terms of the
//! primitive operations, so every backend gets them for free.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::idm::IdentityManager;
use crate::perm::{Gid, Mode, Uid};

bitflags! {
    /// The feature bits a VFS advertises (§6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Features: u32 {
        const IDENTITY_MGR = 1 << 0;
        const HARDLINK     = 1 << 1;
        const SYMLINK      = 1 << 2;
        const READ_ONLY    = 1 << 3;
        const CHROOT       = 1 << 4;
        const SYSTEM_DIRS  = 1 << 5;
        const SUB_FS       = 1 << 6;
    }
}

bitflags! {
    /// Extra bits of an open-flag argument, independent of access mode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenExtra: u32 {
        const APPEND = 1 << 0;
        const CREATE = 1 << 1;
        const EXCL   = 1 << 2;
        const TRUNC  = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// The caller-facing open-flag argument to `open_file`, analogous to the
/// classic `O_RDONLY|O_CREAT|...` bit pattern but split into a proper
/// 2-bit access mode plus independent extra bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFlags {
    pub access: AccessMode,
    pub extra: OpenExtra,
}

impl OpenFlags {
    pub const fn read_only() -> Self {
        Self {
            access: AccessMode::ReadOnly,
            extra: OpenExtra::empty(),
        }
    }

    pub const fn create_truncate_write() -> Self {
        Self {
            access: AccessMode::ReadWrite,
            extra: OpenExtra::CREATE.union(OpenExtra::TRUNC),
        }
    }

    pub fn decode(self) -> OpenMode {
        let mut mode = OpenMode::LOOKUP;
        match self.access {
            AccessMode::ReadOnly => mode |= OpenMode::READ,
            AccessMode::WriteOnly => mode |= OpenMode::WRITE,
            AccessMode::ReadWrite => mode |= OpenMode::READ | OpenMode::WRITE,
        }
        if self.extra.contains(OpenExtra::APPEND) {
            mode |= OpenMode::APPEND | OpenMode::WRITE;
        }
        if self.extra.contains(OpenExtra::CREATE) {
            mode |= OpenMode::CREATE;
        }
        if self.extra.contains(OpenExtra::EXCL) {
            mode |= OpenMode::CREATE_EXCL;
        }
        if self.extra.contains(OpenExtra::TRUNC) {
            mode |= OpenMode::TRUNCATE;
        }
        mode
    }
}

bitflags! {
    /// The decoded open-mode bit set a [`crate::memfs::file::MemFile`]
    /// handle is constructed with.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        const READ         = 1 << 0;
        const WRITE        = 1 << 1;
        const APPEND       = 1 << 2;
        const CREATE       = 1 << 3;
        const CREATE_EXCL  = 1 << 4;
        const TRUNCATE     = 1 << 5;
        const LOOKUP       = 1 << 6;
    }
}

/// The kind of node a [`FileInfo`]/[`DirEntry`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Dir,
    File,
    Symlink,
}

/// A snapshot of a node's metadata, independent of the node itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: Mode,
    pub mod_time_ns: i64,
    pub uid: Uid,
    pub gid: Gid,
    pub kind: FileKind,
    /// The File node's monotonic id, used by `SameFile`. `None` for Dir and
    /// Symlink infos.
    pub file_id: Option<u64>,
    /// Hard-link count; always 0 for directories (§9 open question).
    pub nlink: u32,
}

impl FileInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn perm(&self) -> Mode {
        self.mode & 0o7777
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// Returns whether `a` and `b` name the same underlying File, per §3
/// invariant 6: both must carry a `file_id` and those ids must be equal.
pub fn same_file(a: &FileInfo, b: &FileInfo) -> bool {
    matches!((a.file_id, b.file_id), (Some(x), Some(y)) if x == y)
}

/// One entry produced by a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// A minimal portable stand-in for a native `stat` structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysStat {
    pub mode: Mode,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub nlink: u32,
}

pub fn file_info_to_sys_stat(info: &FileInfo) -> SysStat {
    SysStat {
        mode: info.mode,
        uid: info.uid,
        gid: info.gid,
        size: info.size,
        nlink: info.nlink,
    }
}

/// An open file/directory handle, as returned by `open`/`open_file`.
pub trait VfsFile: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize>;
    fn read_at(&self, buf: &mut [u8], off: u64) -> VfsResult<usize>;
    fn write(&self, buf: &[u8]) -> VfsResult<usize>;
    fn write_at(&self, buf: &[u8], off: u64) -> VfsResult<usize>;
    fn seek(&self, pos: SeekFrom) -> VfsResult<u64>;
    fn truncate(&self, size: u64) -> VfsResult<()>;
    fn read_dir(&self, n: isize) -> VfsResult<Vec<DirEntry>>;
    fn readdirnames(&self, n: isize) -> VfsResult<Vec<String>> {
        Ok(self
            .read_dir(n)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }
    fn chdir(&self) -> VfsResult<()>;
    fn chmod(&self, mode: Mode) -> VfsResult<()>;
    fn chown(&self, uid: Uid, gid: Gid) -> VfsResult<()>;
    fn sync(&self) -> VfsResult<()>;
    fn stat(&self) -> VfsResult<FileInfo>;
    fn name(&self) -> String;
    fn close(&self) -> VfsResult<()>;
}

/// The abstract operations every backend (MemFS) and decorator
/// (BasePathFS, RoFS, MountFS) implements.
pub trait Vfs: Send + Sync {
    fn features(&self) -> Features;

    fn has_feature(&self, f: Features) -> bool {
        self.features().contains(f)
    }

    fn os_type(&self) -> OsFamily;
    fn name(&self) -> String;
    fn vfs_type(&self) -> &'static str;
    fn umask(&self) -> Mode;
    fn set_umask(&self, mask: Mode);
    fn user(&self) -> String;
    fn set_user(&self, name: &str) -> VfsResult<()>;
    fn idm(&self) -> Arc<dyn IdentityManager>;

    /// EVAL-resolves `dir`, which must be a directory, and returns a new
    /// `Vfs` aliasing that subtree (no copy). The default refuses: only
    /// backends that advertise `Features::SUB_FS` support it, and a
    /// decorator wrapping one generally can't reconstruct an equivalent
    /// wrapper over the aliased subtree, so it masks the feature bit
    /// instead of overriding this method.
    fn sub(&self, dir: &str) -> VfsResult<Arc<dyn Vfs>> {
        Err(VfsError::path("sub", dir, ErrorKind::OpNotPermitted, self.os_type()))
    }

    // -- path-lexical helpers, delegated to `crate::path` --

    fn path_separator(&self) -> char {
        self.os_type().path_separator()
    }

    fn is_path_separator(&self, c: char) -> bool {
        crate::path::is_path_separator(c, self.os_type())
    }

    fn is_abs(&self, p: &str) -> bool {
        crate::path::is_abs(p, self.os_type())
    }

    fn clean(&self, p: &str) -> String {
        crate::path::clean(p, self.os_type())
    }

    fn join(&self, elems: &[&str]) -> String {
        crate::path::join(elems, self.os_type())
    }

    fn split(&self, p: &str) -> (String, String) {
        crate::path::split(p, self.os_type())
    }

    fn base(&self, p: &str) -> String {
        crate::path::base(p, self.os_type())
    }

    fn dir(&self, p: &str) -> String {
        crate::path::dir(p, self.os_type())
    }

    fn from_slash(&self, p: &str) -> String {
        crate::path::from_slash(p, self.os_type())
    }

    fn to_slash(&self, p: &str) -> String {
        crate::path::to_slash(p, self.os_type())
    }

    fn volume_name(&self, p: &str) -> String {
        crate::path::volume_name(p, self.os_type()).to_string()
    }

    fn rel(&self, base: &str, target: &str) -> VfsResult<String> {
        crate::path::rel(base, target, self.os_type()).ok_or_else(|| {
            VfsError::path("rel", target, ErrorKind::InvalidArgument, self.os_type())
        })
    }

    fn matches(&self, pattern: &str, name: &str) -> bool {
        crate::path::matches(pattern, name, self.os_type())
    }

    // -- POSIX-shaped operations (§4.2) --

    fn mkdir(&self, name: &str, perm: Mode) -> VfsResult<()>;
    fn mkdir_all(&self, path: &str, perm: Mode) -> VfsResult<()>;

    fn create(&self, name: &str) -> VfsResult<Box<dyn VfsFile>> {
        self.open_file(name, OpenFlags::create_truncate_write(), 0o666)
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: Mode) -> VfsResult<Box<dyn VfsFile>>;

    fn open(&self, name: &str) -> VfsResult<Box<dyn VfsFile>> {
        self.open_file(name, OpenFlags::read_only(), 0)
    }

    fn stat(&self, name: &str) -> VfsResult<FileInfo>;
    fn lstat(&self, name: &str) -> VfsResult<FileInfo>;
    fn eval_symlinks(&self, name: &str) -> VfsResult<String>;
    fn readlink(&self, name: &str) -> VfsResult<String>;
    fn chmod(&self, name: &str, mode: Mode) -> VfsResult<()>;
    fn chown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()>;
    fn lchown(&self, name: &str, uid: Uid, gid: Gid) -> VfsResult<()>;
    fn chtimes(&self, name: &str, atime_ns: i64, mtime_ns: i64) -> VfsResult<()>;
    fn chdir(&self, dir: &str) -> VfsResult<()>;
    fn getwd(&self) -> VfsResult<String>;
    fn truncate(&self, name: &str, size: u64) -> VfsResult<()>;
    fn link(&self, old: &str, new: &str) -> VfsResult<()>;
    fn symlink(&self, old: &str, new: &str) -> VfsResult<()>;
    fn remove(&self, name: &str) -> VfsResult<()>;
    fn remove_all(&self, path: &str) -> VfsResult<()>;
    fn rename(&self, old: &str, new: &str) -> VfsResult<()>;
    fn read_dir(&self, name: &str) -> VfsResult<Vec<DirEntry>>;

    fn same_file(&self, a: &FileInfo, b: &FileInfo) -> bool {
        same_file(a, b)
    }

    // -- tree/temp helpers, built on the primitives above --

    fn read_file(&self, name: &str) -> VfsResult<Vec<u8>> {
        let file = self.open(name)?;
        let info = file.stat()?;
        let mut buf = vec![0u8; info.size() as usize];
        let mut total = 0;
        loop {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn write_file(&self, name: &str, data: &[u8], perm: Mode) -> VfsResult<()> {
        let file = self.open_file(name, OpenFlags::create_truncate_write(), perm)?;
        let mut off = 0;
        while off < data.len() {
            let n = file.write(&data[off..])?;
            if n == 0 {
                break;
            }
            off += n;
        }
        Ok(())
    }

    fn temp_dir(&self) -> String {
        match self.os_type() {
            OsFamily::Windows => "C:\\Windows\\Temp".to_string(),
            OsFamily::Linux | OsFamily::Darwin => "/tmp".to_string(),
        }
    }

    fn create_temp(&self, dir: &str, pattern: &str) -> VfsResult<Box<dyn VfsFile>> {
        let dir = if dir.is_empty() { self.temp_dir() } else { dir.to_string() };
        for _ in 0..10_000 {
            let name = self.join(&[&dir, &expand_temp_pattern(pattern)]);
            let flags = OpenFlags {
                access: AccessMode::ReadWrite,
                extra: OpenExtra::CREATE | OpenExtra::EXCL,
            };
            match self.open_file(&name, flags, 0o600) {
                Ok(f) => return Ok(f),
                Err(e) if e.kind() == ErrorKind::FileExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(VfsError::path(
            "createtemp",
            dir,
            ErrorKind::FileExists,
            self.os_type(),
        ))
    }

    fn mkdir_temp(&self, dir: &str, pattern: &str) -> VfsResult<String> {
        let dir = if dir.is_empty() { self.temp_dir() } else { dir.to_string() };
        for _ in 0..10_000 {
            let name = self.join(&[&dir, &expand_temp_pattern(pattern)]);
            match self.mkdir(&name, 0o700) {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == ErrorKind::FileExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(VfsError::path(
            "mkdirtemp",
            dir,
            ErrorKind::FileExists,
            self.os_type(),
        ))
    }

    fn walk_dir(
        &self,
        root: &str,
        visit: &mut dyn FnMut(&str, &FileInfo) -> VfsResult<()>,
    ) -> VfsResult<()> {
        let info = self.lstat(root)?;
        visit(root, &info)?;
        if !info.is_dir() {
            return Ok(());
        }
        let mut entries = self.read_dir(root)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            let child = self.join(&[root, &entry.name]);
            self.walk_dir(&child, visit)?;
        }
        Ok(())
    }

    fn glob(&self, pattern: &str) -> VfsResult<Vec<String>> {
        let mut results = Vec::new();
        let root = if Vfs::is_abs(self, pattern) {
            self.volume_name(pattern) + &self.path_separator().to_string()
        } else {
            self.getwd()?
        };
        let _ = self.walk_dir(&root, &mut |path, _info| {
            if self.matches(pattern, path) {
                results.push(path.to_string());
            }
            Ok(())
        });
        results.sort();
        Ok(results)
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Expands a `CreateTemp`-style pattern: a single `*` is replaced with a
/// unique suffix; a pattern with no `*` has the suffix appended.
fn expand_temp_pattern(pattern: &str) -> String {
    let suffix = unique_suffix();
    if let Some(pos) = pattern.find('*') {
        format!("{}{}{}", &pattern[..pos], suffix, &pattern[pos + 1..])
    } else {
        format!("{pattern}{suffix}")
    }
}

fn unique_suffix() -> String {
    let count = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    format!("{:x}", nanos ^ count.wrapping_mul(0x9E3779B97F4A7C15))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_decode_sets_implicit_lookup_bit() {
        let flags = OpenFlags::read_only();
        let mode = flags.decode();
        assert!(mode.contains(OpenMode::READ));
        assert!(mode.contains(OpenMode::LOOKUP));
        assert!(!mode.contains(OpenMode::WRITE));
    }

    #[test]
    fn same_file_requires_both_file_ids() {
        let a = FileInfo {
            name: "a".into(),
            size: 0,
            mode: 0,
            mod_time_ns: 0,
            uid: 0,
            gid: 0,
            kind: FileKind::File,
            file_id: Some(1),
            nlink: 1,
        };
        let mut b = a.clone();
        assert!(same_file(&a, &b));
        b.file_id = Some(2);
        assert!(!same_file(&a, &b));
        b.file_id = None;
        assert!(!same_file(&a, &b));
    }
}
