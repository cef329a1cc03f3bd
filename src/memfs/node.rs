//! The node sum type: `Dir`, `File`, `Symlink` over a common base (§3).
//!
//! A node never stores a parent pointer (see the design rationale in the
//! crate root docs): the resolver always produces the parent fresh, and
//! mutations flow parent-first. `Dir` holds its children directly so a hard
//! link is just two `(parent, name)` entries pointing at the same `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::perm::{Gid, Mode, Uid, S_IFDIR, S_IFREG, SYMLINK_MODE};
use crate::vfs_trait::{FileInfo, FileKind};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out the next monotonic file id, used by `SameFile`.
pub fn next_file_id() -> u64 {
    NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub enum NodeKind {
    Dir(HashMap<String, Arc<Node>>),
    File(FileData),
    Symlink(String),
}

#[derive(Debug)]
pub struct FileData {
    pub data: Vec<u8>,
    pub id: u64,
    pub nlink: u32,
}

/// The mutable state shared by every node variant, guarded by the node's
/// own reader-writer lock.
#[derive(Debug)]
pub struct NodeData {
    pub mode: Mode,
    pub uid: Uid,
    pub gid: Gid,
    pub mtime_ns: i64,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub struct Node {
    inner: RwLock<NodeData>,
}

impl Node {
    pub fn new_dir(mode: Mode, uid: Uid, gid: Gid, now_ns: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(NodeData {
                mode: S_IFDIR | (mode & 0o7777),
                uid,
                gid,
                mtime_ns: now_ns,
                kind: NodeKind::Dir(HashMap::new()),
            }),
        })
    }

    pub fn new_file(mode: Mode, uid: Uid, gid: Gid, now_ns: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(NodeData {
                mode: S_IFREG | (mode & 0o7777),
                uid,
                gid,
                mtime_ns: now_ns,
                kind: NodeKind::File(FileData {
                    data: Vec::new(),
                    id: next_file_id(),
                    nlink: 1,
                }),
            }),
        })
    }

    pub fn new_symlink(target: impl Into<String>, uid: Uid, gid: Gid, now_ns: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(NodeData {
                mode: SYMLINK_MODE,
                uid,
                gid,
                mtime_ns: now_ns,
                kind: NodeKind::Symlink(target.into()),
            }),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NodeData> {
        self.inner.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, NodeData> {
        self.inner.write().unwrap()
    }

    pub fn kind_tag(&self) -> FileKind {
        match self.read().kind {
            NodeKind::Dir(_) => FileKind::Dir,
            NodeKind::File(_) => FileKind::File,
            NodeKind::Symlink(_) => FileKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind_tag(), FileKind::Dir)
    }

    /// A directory's size, per §3, is its child count; a file's is its
    /// buffer length; a symlink's is its target string length.
    pub fn size(&self) -> u64 {
        match &self.read().kind {
            NodeKind::Dir(children) => children.len() as u64,
            NodeKind::File(f) => f.data.len() as u64,
            NodeKind::Symlink(target) => target.len() as u64,
        }
    }

    /// `nlink` for a Dir is always 0 (§9 open question, resolved).
    pub fn nlink(&self) -> u32 {
        match &self.read().kind {
            NodeKind::Dir(_) => 0,
            NodeKind::File(f) => f.nlink,
            NodeKind::Symlink(_) => 1,
        }
    }

    pub fn file_id(&self) -> Option<u64> {
        match &self.read().kind {
            NodeKind::File(f) => Some(f.id),
            _ => None,
        }
    }

    pub fn to_file_info(&self, name: &str) -> FileInfo {
        let data = self.read();
        FileInfo {
            name: name.to_string(),
            size: self.size(),
            mode: data.mode,
            mod_time_ns: data.mtime_ns,
            uid: data.uid,
            gid: data.gid,
            kind: self.kind_tag(),
            file_id: self.file_id(),
            nlink: self.nlink(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_ids_are_monotonic_and_unique() {
        let a = Node::new_file(0o644, 0, 0, 0);
        let b = Node::new_file(0o644, 0, 0, 0);
        assert_ne!(a.file_id(), b.file_id());
    }

    #[test]
    fn dir_size_tracks_children() {
        let dir = Node::new_dir(0o755, 0, 0, 0);
        assert_eq!(dir.size(), 0);
        {
            let mut data = dir.write();
            if let NodeKind::Dir(children) = &mut data.kind {
                children.insert("a".to_string(), Node::new_file(0o644, 0, 0, 0));
            }
        }
        assert_eq!(dir.size(), 1);
    }

    #[test]
    fn symlink_mode_is_fixed() {
        let link = Node::new_symlink("/target", 0, 0, 0);
        assert_eq!(link.read().mode, SYMLINK_MODE);
    }
}
