//! Structured errors shared by every operation in this crate.
//!
//! There are exactly two wrapper shapes, matching the two families of
//! path-taking operations: [`PathError`] for single-path operations and
//! [`LinkError`] for the handful that name two paths (`link`, `rename`,
//! `symlink`). Both carry an OS-family-independent [`ErrorKind`]; the
//! concrete wording is only chosen at `Display` time, from the instance's
//! configured [`OsFamily`].

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The OS family a filesystem instance emulates.
///
/// This drives path-separator choice, volume semantics, and the concrete
/// wording of errors and operation names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    Windows,
    /// Shares the Linux error catalogue and path semantics unless noted.
    Darwin,
}

impl OsFamily {
    /// The path separator for this family.
    pub fn path_separator(self) -> char {
        match self {
            OsFamily::Windows => '\\',
            OsFamily::Linux | OsFamily::Darwin => '/',
        }
    }

    /// Translates a canonical, OS-neutral operation name into the name this
    /// family's native API would use for it.
    pub fn op_name(self, canonical: &'static str) -> &'static str {
        if self != OsFamily::Windows {
            return canonical;
        }
        match canonical {
            "stat" | "lstat" | "open" | "openfile" => "CreateFile",
            "chmod" => "SetFileAttributes",
            "chown" | "lchown" => "chown",
            "mkdir" => "CreateDirectory",
            "remove" => "DeleteFile",
            "rename" => "MoveFile",
            "link" => "CreateHardLink",
            "symlink" => "CreateSymbolicLink",
            other => other,
        }
    }
}

/// An abstract error kind, independent of OS-family wording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotExist,
    IsADirectory,
    NotADirectory,
    PermissionDenied,
    OpNotPermitted,
    FileExists,
    DirNotEmpty,
    TooManySymlinks,
    BadFileDescriptor,
    InvalidArgument,
    FileClosing,
    CrossDeviceLink,
    NegativeOffset,
    InvalidName,
}

impl ErrorKind {
    /// Renders this kind the way the given OS family's native API would
    /// word it.
    pub fn message(self, family: OsFamily) -> &'static str {
        use ErrorKind::*;
        match (self, family) {
            (NotExist, OsFamily::Windows) => "The system cannot find the file specified.",
            (NotExist, _) => "no such file or directory",
            (IsADirectory, OsFamily::Windows) => "Access is denied.",
            (IsADirectory, _) => "is a directory",
            (NotADirectory, OsFamily::Windows) => "The directory name is invalid.",
            (NotADirectory, _) => "not a directory",
            (PermissionDenied, OsFamily::Windows) => "Access is denied.",
            (PermissionDenied, _) => "permission denied",
            (OpNotPermitted, OsFamily::Windows) => {
                "A required privilege is not held by the client."
            }
            (OpNotPermitted, _) => "operation not permitted",
            (FileExists, OsFamily::Windows) => {
                "Cannot create a file when that file already exists."
            }
            (FileExists, _) => "file exists",
            (DirNotEmpty, OsFamily::Windows) => "The directory is not empty.",
            (DirNotEmpty, _) => "directory not empty",
            (TooManySymlinks, OsFamily::Windows) => {
                "The name of the file cannot be resolved by the system."
            }
            (TooManySymlinks, _) => "too many levels of symbolic links",
            (BadFileDescriptor, _) => "bad file descriptor",
            (InvalidArgument, _) => "invalid argument",
            (FileClosing, _) => "file already closed",
            (CrossDeviceLink, OsFamily::Windows) => {
                "The system cannot move the file to a different disk drive."
            }
            (CrossDeviceLink, _) => "invalid cross-device link",
            (NegativeOffset, _) => "negative offset",
            (InvalidName, _) => "invalid name",
        }
    }
}

/// An error naming a single path, e.g. `stat`, `open`, `mkdir`.
#[derive(Clone, Debug)]
pub struct PathError {
    pub op: &'static str,
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub family: OsFamily,
}

impl PathError {
    pub fn new(op: &'static str, path: impl Into<PathBuf>, kind: ErrorKind, family: OsFamily) -> Self {
        Self {
            op: family.op_name(op),
            path: path.into(),
            kind,
            family,
        }
    }

    /// Returns a copy of this error with `path` rewritten, used by the
    /// decorators to translate an inner error back into outer coordinates.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            self.op,
            self.path.display(),
            self.kind.message(self.family)
        )
    }
}

impl std::error::Error for PathError {}

/// An error naming two paths: `link`, `rename`, `symlink`.
#[derive(Clone, Debug)]
pub struct LinkError {
    pub op: &'static str,
    pub old: PathBuf,
    pub new: PathBuf,
    pub kind: ErrorKind,
    pub family: OsFamily,
}

impl LinkError {
    pub fn new(
        op: &'static str,
        old: impl Into<PathBuf>,
        new: impl Into<PathBuf>,
        kind: ErrorKind,
        family: OsFamily,
    ) -> Self {
        Self {
            op: family.op_name(op),
            old: old.into(),
            new: new.into(),
            kind,
            family,
        }
    }

    pub fn with_paths(&self, old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}: {}",
            self.op,
            self.old.display(),
            self.new.display(),
            self.kind.message(self.family)
        )
    }
}

impl std::error::Error for LinkError {}

/// The error type returned by every fallible operation in this crate.
#[derive(Clone, Debug, Error)]
pub enum VfsError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

impl VfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::Path(e) => e.kind,
            VfsError::Link(e) => e.kind,
        }
    }

    /// The OS family the error was rendered against.
    pub fn family(&self) -> OsFamily {
        match self {
            VfsError::Path(e) => e.family,
            VfsError::Link(e) => e.family,
        }
    }

    /// Returns a copy with every embedded path rewritten by `f`, used by
    /// the decorators to translate errors crossing a path-rewriting
    /// boundary.
    pub fn map_paths(&self, f: impl Fn(&Path) -> PathBuf) -> VfsError {
        match self {
            VfsError::Path(e) => VfsError::Path(e.with_path(f(&e.path))),
            VfsError::Link(e) => VfsError::Link(e.with_paths(f(&e.old), f(&e.new))),
        }
    }

    pub fn path(op: &'static str, path: impl Into<PathBuf>, kind: ErrorKind, family: OsFamily) -> Self {
        VfsError::Path(PathError::new(op, path, kind, family))
    }

    pub fn link(
        op: &'static str,
        old: impl Into<PathBuf>,
        new: impl Into<PathBuf>,
        kind: ErrorKind,
        family: OsFamily,
    ) -> Self {
        VfsError::Link(LinkError::new(op, old, new, kind, family))
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_display_uses_family_wording() {
        let linux = PathError::new("stat", "/missing", ErrorKind::NotExist, OsFamily::Linux);
        assert!(linux.to_string().contains("no such file or directory"));

        let windows = PathError::new("stat", "C:\\missing", ErrorKind::NotExist, OsFamily::Windows);
        assert!(windows.to_string().contains("cannot find the file"));
        assert_eq!(windows.op, "CreateFile");
    }

    #[test]
    fn map_paths_rewrites_both_link_error_fields() {
        let err = VfsError::link(
            "rename",
            "/base/old",
            "/base/new",
            ErrorKind::FileExists,
            OsFamily::Linux,
        );
        let rewritten = err.map_paths(|p| {
            PathBuf::from("/").join(p.strip_prefix("/base").unwrap_or(p))
        });
        match rewritten {
            VfsError::Link(e) => {
                assert_eq!(e.old, PathBuf::from("/old"));
                assert_eq!(e.new, PathBuf::from("/new"));
            }
            _ => panic!("expected link error"),
        }
    }
}
