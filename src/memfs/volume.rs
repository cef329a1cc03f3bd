//! The Windows-family volume table (§3): a name → root-directory mapping,
//! disjoint per volume, with a default volume selected at construction.
//!
//! Linux-family instances never populate this; they have exactly one
//! volume, the empty-named one rooted at `/`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ErrorKind, OsFamily, VfsError, VfsResult};
use crate::perm::{Gid, Mode, Uid};

use super::node::Node;

pub struct VolumeTable {
    volumes: HashMap<String, Arc<Node>>,
    default: String,
}

impl VolumeTable {
    /// A single-volume table for Linux/Darwin, the volume name empty.
    pub fn single(root: Arc<Node>) -> Self {
        let mut volumes = HashMap::new();
        volumes.insert(String::new(), root);
        Self {
            volumes,
            default: String::new(),
        }
    }

    /// A Windows-family table with one default volume preloaded.
    pub fn windows_default(default_name: &str, mode: Mode, uid: Uid, gid: Gid, now_ns: i64) -> Self {
        let mut volumes = HashMap::new();
        volumes.insert(default_name.to_string(), Node::new_dir(mode, uid, gid, now_ns));
        Self {
            volumes,
            default: default_name.to_string(),
        }
    }

    pub fn default_volume(&self) -> &str {
        &self.default
    }

    pub fn root_of(&self, volume: &str) -> Option<Arc<Node>> {
        self.volumes.get(volume).cloned()
    }

    pub fn default_root(&self) -> Arc<Node> {
        self.volumes[&self.default].clone()
    }

    pub fn add_volume(&mut self, name: &str, mode: Mode, uid: Uid, gid: Gid, now_ns: i64) -> VfsResult<()> {
        if self.volumes.contains_key(name) {
            return Err(VfsError::path(
                "mount",
                name,
                ErrorKind::FileExists,
                OsFamily::Windows,
            ));
        }
        self.volumes
            .insert(name.to_string(), Node::new_dir(mode, uid, gid, now_ns));
        Ok(())
    }

    /// Resolves the volume prefix of `path`, returning its root node, or
    /// `None` if the prefix names no known volume.
    pub fn anchor_for(&self, volume_name: &str) -> Option<Arc<Node>> {
        if volume_name.is_empty() {
            return Some(self.default_root());
        }
        self.root_of(volume_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_volume_anchors_empty_prefix() {
        let root = Node::new_dir(0o755, 0, 0, 0);
        let table = VolumeTable::single(root);
        assert!(table.anchor_for("").is_some());
        assert!(table.anchor_for("C:").is_none());
    }

    #[test]
    fn windows_table_rejects_duplicate_volume() {
        let mut table = VolumeTable::windows_default("C:", 0o755, 0, 0, 0);
        assert!(table.add_volume("D:", 0o755, 0, 0, 0).is_ok());
        assert!(table.add_volume("C:", 0o755, 0, 0, 0).is_err());
    }
}
