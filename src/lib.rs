//! A pluggable, POSIX-shaped virtual filesystem.
//!
//! [`memfs::MemFS`] is the in-memory core: a tree of directories, files, and
//! symlinks behind the [`vfs_trait::Vfs`]/[`vfs_trait::VfsFile`] contract.
//! Three decorators compose over any `Vfs`: [`basepathfs::BasePathFS`]
//! clamps every path under a base directory, [`rofs::RoFS`] masks out every
//! mutating operation, and [`mountfs::MountFS`] unions several `Vfs`
//! instances under a single namespace by longest mount-point match.

pub mod basepathfs;
pub mod dummy;
pub mod error;
pub mod idm;
pub mod memfs;
pub mod mountfs;
pub mod path;
pub mod perm;
pub mod rofs;
pub mod vfs_trait;

pub use error::{ErrorKind, OsFamily, VfsError, VfsResult};
pub use memfs::{MemFS, MemfsBuilder};
pub use vfs_trait::{Vfs, VfsFile};
