//! `MemFile`: the open-handle contract of §4.3.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::perm::{is_owner_or_admin, AccessProfile, Gid, Mode, Uid};
use crate::vfs_trait::{DirEntry, FileInfo, OpenMode, VfsFile};

use super::node::{Node, NodeKind};
use super::now_ns;

struct DirCache {
    entries: Vec<DirEntry>,
    idx: usize,
}

/// An open handle to a node within a particular `MemFS`.
pub struct MemFile {
    node: Arc<Node>,
    name: String,
    mode: OpenMode,
    family: OsFamily,
    profile: AccessProfile,
    offset: Mutex<u64>,
    closed: AtomicBool,
    dir_cache: Mutex<Option<DirCache>>,
    cwd: Arc<RwLock<String>>,
    resolved_dir_path: String,
}

impl MemFile {
    pub(super) fn new(
        node: Arc<Node>,
        name: String,
        mode: OpenMode,
        family: OsFamily,
        profile: AccessProfile,
        initial_offset: u64,
        cwd: Arc<RwLock<String>>,
        resolved_dir_path: String,
    ) -> Self {
        Self {
            node,
            name,
            mode,
            family,
            profile,
            offset: Mutex::new(initial_offset),
            closed: AtomicBool::new(false),
            dir_cache: Mutex::new(None),
            cwd,
            resolved_dir_path,
        }
    }

    fn check_open(&self) -> VfsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VfsError::path(
                "close",
                self.name.clone(),
                ErrorKind::FileClosing,
                self.family,
            ));
        }
        Ok(())
    }

    fn bad_fd(&self, op: &'static str) -> VfsError {
        VfsError::path(op, self.name.clone(), ErrorKind::BadFileDescriptor, self.family)
    }
}

impl VfsFile for MemFile {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.check_open()?;
        if !self.mode.contains(OpenMode::READ) {
            return Err(self.bad_fd("read"));
        }
        if self.node.is_dir() {
            return Err(VfsError::path(
                "read",
                self.name.clone(),
                ErrorKind::IsADirectory,
                self.family,
            ));
        }
        let mut offset = self.offset.lock().unwrap();
        let n = self.read_at(buf, *offset)?;
        *offset += n as u64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], off: u64) -> VfsResult<usize> {
        self.check_open()?;
        if !self.mode.contains(OpenMode::READ) {
            return Err(self.bad_fd("read"));
        }
        let data = self.node.read();
        let NodeKind::File(f) = &data.kind else {
            return Err(VfsError::path(
                "read",
                self.name.clone(),
                ErrorKind::IsADirectory,
                self.family,
            ));
        };
        let off = off as usize;
        if off >= f.data.len() {
            return Ok(0);
        }
        let end = (off + buf.len()).min(f.data.len());
        let n = end - off;
        buf[..n].copy_from_slice(&f.data[off..end]);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        self.check_open()?;
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(self.bad_fd("write"));
        }
        let mut offset = self.offset.lock().unwrap();
        if self.mode.contains(OpenMode::APPEND) {
            let data = self.node.read();
            if let NodeKind::File(f) = &data.kind {
                *offset = f.data.len() as u64;
            }
        }
        let n = self.write_at(buf, *offset)?;
        *offset += n as u64;
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> VfsResult<usize> {
        self.check_open()?;
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(self.bad_fd("write"));
        }
        let mut data = self.node.write();
        let NodeKind::File(f) = &mut data.kind else {
            return Err(VfsError::path(
                "write",
                self.name.clone(),
                ErrorKind::IsADirectory,
                self.family,
            ));
        };
        let off = off as usize;
        let end = off + buf.len();
        if end > f.data.len() {
            f.data.resize(end, 0);
        }
        f.data[off..end].copy_from_slice(buf);
        data.mtime_ns = now_ns();
        Ok(buf.len())
    }

    fn seek(&self, pos: SeekFrom) -> VfsResult<u64> {
        self.check_open()?;
        let size = self.node.size() as i64;
        let mut offset = self.offset.lock().unwrap();
        let base = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => *offset as i64 + delta,
            SeekFrom::End(delta) => size + delta,
        };
        if base < 0 {
            return Err(VfsError::path(
                "seek",
                self.name.clone(),
                ErrorKind::InvalidArgument,
                self.family,
            ));
        }
        *offset = base as u64;
        Ok(*offset)
    }

    fn truncate(&self, size: u64) -> VfsResult<()> {
        self.check_open()?;
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(self.bad_fd("truncate"));
        }
        let mut data = self.node.write();
        let NodeKind::File(f) = &mut data.kind else {
            return Err(VfsError::path(
                "truncate",
                self.name.clone(),
                ErrorKind::IsADirectory,
                self.family,
            ));
        };
        f.data.resize(size as usize, 0);
        data.mtime_ns = now_ns();
        Ok(())
    }

    fn read_dir(&self, n: isize) -> VfsResult<Vec<DirEntry>> {
        self.check_open()?;
        if !self.node.is_dir() {
            return Err(VfsError::path(
                "readdir",
                self.name.clone(),
                ErrorKind::NotADirectory,
                self.family,
            ));
        }
        let mut cache = self.dir_cache.lock().unwrap();
        if cache.is_none() || n <= 0 {
            let mut entries: Vec<DirEntry> = match &self.node.read().kind {
                NodeKind::Dir(children) => children
                    .iter()
                    .map(|(name, node)| DirEntry {
                        name: name.clone(),
                        kind: node.kind_tag(),
                    })
                    .collect(),
                _ => unreachable!(),
            };
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            *cache = Some(DirCache { entries, idx: 0 });
        }
        let dc = cache.as_mut().unwrap();
        if n <= 0 {
            let all = dc.entries.clone();
            *cache = None;
            return Ok(all);
        }
        let start = dc.idx;
        let end = (start + n as usize).min(dc.entries.len());
        let page = dc.entries[start..end].to_vec();
        dc.idx = end;
        if page.is_empty() {
            // End of the paginated listing: an empty page signals EOF,
            // not an error, and the cache is dropped so the next call
            // starts a fresh snapshot.
            *cache = None;
        }
        Ok(page)
    }

    fn chdir(&self) -> VfsResult<()> {
        self.check_open()?;
        if !self.node.is_dir() {
            return Err(VfsError::path(
                "chdir",
                self.name.clone(),
                ErrorKind::NotADirectory,
                self.family,
            ));
        }
        *self.cwd.write().unwrap() = self.resolved_dir_path.clone();
        Ok(())
    }

    fn chmod(&self, mode: Mode) -> VfsResult<()> {
        self.check_open()?;
        let mut data = self.node.write();
        if !is_owner_or_admin(&self.profile, data.uid) {
            return Err(VfsError::path(
                "chmod",
                self.name.clone(),
                ErrorKind::PermissionDenied,
                self.family,
            ));
        }
        data.mode = (data.mode & !0o7777) | (mode & 0o7777);
        Ok(())
    }

    fn chown(&self, uid: Uid, gid: Gid) -> VfsResult<()> {
        self.check_open()?;
        if !self.profile.is_admin() {
            return Err(VfsError::path(
                "chown",
                self.name.clone(),
                ErrorKind::OpNotPermitted,
                self.family,
            ));
        }
        let mut data = self.node.write();
        data.uid = uid;
        data.gid = gid;
        Ok(())
    }

    fn sync(&self) -> VfsResult<()> {
        self.check_open()
    }

    fn stat(&self) -> VfsResult<FileInfo> {
        self.check_open()?;
        Ok(self.node.to_file_info(&self.name))
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&self) -> VfsResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
