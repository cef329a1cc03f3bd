//! The path resolver (§4.1): absolute path → `(parent, child, name)`,
//! under a symlink policy.
//!
//! Nodes carry no parent pointer, so a `..` can't be walked structurally.
//! Instead every symlink substitution is resolved by rebuilding the
//! lexical path from the root (`resolved-so-far + target`), cleaning it,
//! and restarting the walk from the volume root with the cleaned
//! components — this keeps `..` correct without ever storing a back
//! pointer in a node.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::OsFamily;
use crate::path;
use crate::perm::{check_access, Access, AccessProfile};
use crate::vfs_trait::FileKind;

use super::node::{Node, NodeKind};

pub const SYMLOOP_MAX: u32 = 64;

/// How the resolver treats a symlink at the terminal path segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Never follow a terminal symlink.
    Lstat,
    /// Follow it for metadata purposes, but keep reporting the link's own
    /// basename (see `resolve`'s two-phase handling below).
    Stat,
    /// Follow it, returning the fully dereferenced node and path.
    Eval,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveError {
    NotExist,
    NotADirectory,
    PermissionDenied,
    TooManySymlinks,
}

/// The resolver's successful outcome.
///
/// `child` is `None` exactly when the final segment does not exist yet
/// (the "creatable" case `Mkdir`/`Create`/`Link`/`Symlink` need); `parent`
/// is always present, and equals `child` for a bare root lookup, per the
/// root's "parent is itself" invariant.
pub struct Resolved {
    pub parent: Arc<Node>,
    pub child: Option<Arc<Node>>,
    pub name: String,
    pub resolved_path: String,
}

fn split_components(path: &str, family: OsFamily) -> VecDeque<String> {
    path.split(|c| path::is_path_separator(c, family))
        .filter(|c| !c.is_empty() && *c != ".")
        .map(|c| c.to_string())
        .collect()
}

fn render_path(components: &[String], family: OsFamily) -> String {
    let sep = path::path_separator(family);
    if components.is_empty() {
        return sep.to_string();
    }
    let mut out = String::new();
    for c in components {
        out.push(sep);
        out.push_str(c);
    }
    out
}

struct RawResolved {
    parent: Arc<Node>,
    child: Option<Arc<Node>>,
    name: String,
    resolved: Vec<String>,
}

fn lookup_child(dir: &Arc<Node>, name: &str) -> Result<Option<Arc<Node>>, ResolveError> {
    match &dir.read().kind {
        NodeKind::Dir(children) => Ok(children.get(name).cloned()),
        _ => Err(ResolveError::NotADirectory),
    }
}

fn check_lookup(dir: &Arc<Node>, profile: &AccessProfile) -> Result<(), ResolveError> {
    let data = dir.read();
    if check_access(profile, data.mode, data.uid, data.gid, Access::Execute) {
        Ok(())
    } else {
        Err(ResolveError::PermissionDenied)
    }
}

/// Walks `components` from `root`, following every non-terminal symlink
/// (and the terminal one too when `follow_terminal` is set).
fn resolve_walk(
    root: &Arc<Node>,
    components: VecDeque<String>,
    follow_terminal: bool,
    profile: &AccessProfile,
    family: OsFamily,
    budget: &mut u32,
) -> Result<RawResolved, ResolveError> {
    let mut current = root.clone();
    let mut resolved: Vec<String> = Vec::new();
    let mut components = components;

    loop {
        let Some(name) = components.pop_front() else {
            return Ok(RawResolved {
                parent: current.clone(),
                child: Some(current),
                name: String::new(),
                resolved,
            });
        };
        let is_last = components.is_empty();

        if name == ".." {
            // Only reachable if a spliced symlink target re-introduced one;
            // plain input paths are pre-cleaned by the caller. Pop back to
            // the parent lexically by dropping the last resolved component
            // and restarting from root, the same trick used for symlinks.
            resolved.pop();
            let mut rest: VecDeque<String> = resolved.drain(..).collect();
            rest.extend(components);
            return resolve_walk(root, rest, follow_terminal, profile, family, budget);
        }

        let child = lookup_child(&current, &name)?;
        match child {
            None => {
                if is_last {
                    return Ok(RawResolved {
                        parent: current,
                        child: None,
                        name,
                        resolved,
                    });
                }
                return Err(ResolveError::NotExist);
            }
            Some(node) => match node.kind_tag() {
                FileKind::Dir => {
                    if is_last {
                        resolved.push(name.clone());
                        return Ok(RawResolved {
                            parent: current,
                            child: Some(node),
                            name,
                            resolved,
                        });
                    }
                    check_lookup(&node, profile)?;
                    resolved.push(name);
                    current = node;
                }
                FileKind::File => {
                    if is_last {
                        resolved.push(name.clone());
                        return Ok(RawResolved {
                            parent: current,
                            child: Some(node),
                            name,
                            resolved,
                        });
                    }
                    return Err(ResolveError::NotADirectory);
                }
                FileKind::Symlink => {
                    if is_last && !follow_terminal {
                        resolved.push(name.clone());
                        return Ok(RawResolved {
                            parent: current,
                            child: Some(node),
                            name,
                            resolved,
                        });
                    }
                    *budget += 1;
                    if *budget > SYMLOOP_MAX {
                        return Err(ResolveError::TooManySymlinks);
                    }
                    let target = match &node.read().kind {
                        NodeKind::Symlink(t) => t.clone(),
                        _ => unreachable!(),
                    };
                    let base = render_path(&resolved, family);
                    let combined = if path::is_abs(&target, family) {
                        target
                    } else {
                        format!("{base}{}{target}", path::path_separator(family))
                    };
                    let cleaned = path::clean(&combined, family);
                    let mut new_components = split_components(&cleaned, family);
                    new_components.extend(components);
                    return resolve_walk(root, new_components, follow_terminal, profile, family, budget);
                }
            },
        }
    }
}

/// Resolves `path_after_volume` (already volume-stripped) from `root`
/// under `policy`. `path_after_volume` must already be lexically cleaned
/// by the caller for the *input* path (symlink-target splicing cleans
/// itself internally).
pub fn resolve(
    root: &Arc<Node>,
    path_after_volume: &str,
    policy: Policy,
    profile: &AccessProfile,
    family: OsFamily,
) -> Result<Resolved, ResolveError> {
    let components = split_components(path_after_volume, family);
    let mut budget = 0u32;
    let follow_terminal = matches!(policy, Policy::Eval);
    let raw = resolve_walk(root, components.clone(), follow_terminal, profile, family, &mut budget)?;

    if policy == Policy::Stat {
        if let Some(child) = &raw.child {
            if matches!(child.kind_tag(), FileKind::Symlink) {
                let mut budget2 = budget;
                let deref = resolve_walk(root, components, true, profile, family, &mut budget2)?;
                return Ok(Resolved {
                    parent: raw.parent,
                    child: deref.child,
                    name: raw.name,
                    resolved_path: render_path(&raw.resolved, family),
                });
            }
        }
    }

    Ok(Resolved {
        parent: raw.parent,
        child: raw.child,
        name: raw.name,
        resolved_path: render_path(&raw.resolved, family),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::AccessProfile;

    fn root_with_dir_and_file() -> Arc<Node> {
        let root = Node::new_dir(0o755, 0, 0, 0);
        let sub = Node::new_dir(0o755, 0, 0, 0);
        let file = Node::new_file(0o644, 0, 0, 0);
        if let NodeKind::Dir(children) = &mut root.write().kind {
            children.insert("d".to_string(), sub.clone());
        }
        if let NodeKind::Dir(children) = &mut sub.write().kind {
            children.insert("f".to_string(), file);
        }
        root
    }

    #[test]
    fn resolves_existing_file() {
        let root = root_with_dir_and_file();
        let profile = AccessProfile::ROOT;
        let r = resolve(&root, "/d/f", Policy::Eval, &profile, OsFamily::Linux).unwrap();
        assert!(r.child.is_some());
        assert_eq!(r.name, "f");
    }

    #[test]
    fn missing_intermediate_is_not_exist() {
        let root = root_with_dir_and_file();
        let profile = AccessProfile::ROOT;
        let err = resolve(&root, "/nope/f", Policy::Eval, &profile, OsFamily::Linux).unwrap_err();
        assert_eq!(err, ResolveError::NotExist);
    }

    #[test]
    fn missing_terminal_is_creatable() {
        let root = root_with_dir_and_file();
        let profile = AccessProfile::ROOT;
        let r = resolve(&root, "/d/new", Policy::Eval, &profile, OsFamily::Linux).unwrap();
        assert!(r.child.is_none());
        assert_eq!(r.name, "new");
    }

    #[test]
    fn file_mid_path_is_not_a_directory() {
        let root = root_with_dir_and_file();
        let profile = AccessProfile::ROOT;
        let err = resolve(&root, "/d/f/x", Policy::Eval, &profile, OsFamily::Linux).unwrap_err();
        assert_eq!(err, ResolveError::NotADirectory);
    }

    #[test]
    fn symlink_loop_is_detected() {
        let root = Node::new_dir(0o755, 0, 0, 0);
        let a = Node::new_symlink("/b", 0, 0, 0);
        let b = Node::new_symlink("/a", 0, 0, 0);
        if let NodeKind::Dir(children) = &mut root.write().kind {
            children.insert("a".to_string(), a);
            children.insert("b".to_string(), b);
        }
        let profile = AccessProfile::ROOT;
        let err = resolve(&root, "/a", Policy::Eval, &profile, OsFamily::Linux).unwrap_err();
        assert_eq!(err, ResolveError::TooManySymlinks);
    }

    #[test]
    fn lstat_does_not_follow_terminal_symlink() {
        let root = Node::new_dir(0o755, 0, 0, 0);
        let link = Node::new_symlink("/missing", 0, 0, 0);
        if let NodeKind::Dir(children) = &mut root.write().kind {
            children.insert("l".to_string(), link);
        }
        let profile = AccessProfile::ROOT;
        let r = resolve(&root, "/l", Policy::Lstat, &profile, OsFamily::Linux).unwrap();
        assert_eq!(r.child.unwrap().kind_tag(), FileKind::Symlink);
    }
}
