//! The in-memory identity manager: the user/group ↔ id mapping MemFS
//! queries to set file ownership and resolve the current user by name.
//!
//! This is an external collaborator from the core's point of view — MemFS
//! only ever calls the small contract below — but the core needs a real
//! implementation to run against, not a stub, so one is provided here.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::perm::{Gid, Uid, ROOT_GID, ROOT_UID};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IdmError {
    #[error("unknown user")]
    UnknownUser,
    #[error("unknown group")]
    UnknownGroup,
    #[error("user already exists")]
    UserExists,
    #[error("group already exists")]
    GroupExists,
    #[error("invalid name")]
    InvalidName,
}

pub type IdmResult<T> = Result<T, IdmError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub uid: Uid,
    pub name: String,
    pub gid: Gid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub gid: Gid,
    pub name: String,
}

/// The contract MemFS consumes to map names to ids and back.
pub trait IdentityManager: Send + Sync {
    fn lookup_user(&self, name: &str) -> IdmResult<UserRecord>;
    fn lookup_user_id(&self, uid: Uid) -> IdmResult<UserRecord>;
    fn lookup_group(&self, name: &str) -> IdmResult<GroupRecord>;
    fn lookup_group_id(&self, gid: Gid) -> IdmResult<GroupRecord>;
    fn admin_user(&self) -> UserRecord;
    fn admin_group(&self) -> GroupRecord;
    fn user_add(&self, name: &str, group: &str) -> IdmResult<UserRecord>;
    fn user_del(&self, name: &str) -> IdmResult<()>;
    fn group_add(&self, name: &str) -> IdmResult<GroupRecord>;
    fn group_del(&self, name: &str) -> IdmResult<()>;
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

struct State {
    users: HashMap<String, UserRecord>,
    users_by_id: HashMap<Uid, String>,
    groups: HashMap<String, GroupRecord>,
    groups_by_id: HashMap<Gid, String>,
    next_uid: Uid,
    next_gid: Gid,
}

/// A real, process-local identity manager: a simple name/id table preloaded
/// with a root user and root group.
pub struct InMemoryIdm {
    state: RwLock<State>,
}

impl Default for InMemoryIdm {
    fn default() -> Self {
        let mut users = HashMap::new();
        let mut users_by_id = HashMap::new();
        users.insert(
            "root".to_string(),
            UserRecord {
                uid: ROOT_UID,
                name: "root".to_string(),
                gid: ROOT_GID,
            },
        );
        users_by_id.insert(ROOT_UID, "root".to_string());

        let mut groups = HashMap::new();
        let mut groups_by_id = HashMap::new();
        groups.insert(
            "root".to_string(),
            GroupRecord {
                gid: ROOT_GID,
                name: "root".to_string(),
            },
        );
        groups_by_id.insert(ROOT_GID, "root".to_string());

        Self {
            state: RwLock::new(State {
                users,
                users_by_id,
                groups,
                groups_by_id,
                next_uid: ROOT_UID + 1,
                next_gid: ROOT_GID + 1,
            }),
        }
    }
}

impl IdentityManager for InMemoryIdm {
    fn lookup_user(&self, name: &str) -> IdmResult<UserRecord> {
        self.state
            .read()
            .unwrap()
            .users
            .get(name)
            .cloned()
            .ok_or(IdmError::UnknownUser)
    }

    fn lookup_user_id(&self, uid: Uid) -> IdmResult<UserRecord> {
        let state = self.state.read().unwrap();
        let name = state.users_by_id.get(&uid).ok_or(IdmError::UnknownUser)?;
        Ok(state.users[name].clone())
    }

    fn lookup_group(&self, name: &str) -> IdmResult<GroupRecord> {
        self.state
            .read()
            .unwrap()
            .groups
            .get(name)
            .cloned()
            .ok_or(IdmError::UnknownGroup)
    }

    fn lookup_group_id(&self, gid: Gid) -> IdmResult<GroupRecord> {
        let state = self.state.read().unwrap();
        let name = state.groups_by_id.get(&gid).ok_or(IdmError::UnknownGroup)?;
        Ok(state.groups[name].clone())
    }

    fn admin_user(&self) -> UserRecord {
        self.lookup_user("root").expect("root user always present")
    }

    fn admin_group(&self) -> GroupRecord {
        self.lookup_group("root").expect("root group always present")
    }

    fn user_add(&self, name: &str, group: &str) -> IdmResult<UserRecord> {
        if !valid_name(name) {
            return Err(IdmError::InvalidName);
        }
        let mut state = self.state.write().unwrap();
        if state.users.contains_key(name) {
            return Err(IdmError::UserExists);
        }
        let gid = state
            .groups
            .get(group)
            .map(|g| g.gid)
            .ok_or(IdmError::UnknownGroup)?;
        let uid = state.next_uid;
        state.next_uid += 1;
        let record = UserRecord {
            uid,
            name: name.to_string(),
            gid,
        };
        state.users.insert(name.to_string(), record.clone());
        state.users_by_id.insert(uid, name.to_string());
        Ok(record)
    }

    fn user_del(&self, name: &str) -> IdmResult<()> {
        let mut state = self.state.write().unwrap();
        let record = state.users.remove(name).ok_or(IdmError::UnknownUser)?;
        state.users_by_id.remove(&record.uid);
        Ok(())
    }

    fn group_add(&self, name: &str) -> IdmResult<GroupRecord> {
        if !valid_name(name) {
            return Err(IdmError::InvalidName);
        }
        let mut state = self.state.write().unwrap();
        if state.groups.contains_key(name) {
            return Err(IdmError::GroupExists);
        }
        let gid = state.next_gid;
        state.next_gid += 1;
        let record = GroupRecord {
            gid,
            name: name.to_string(),
        };
        state.groups.insert(name.to_string(), record.clone());
        state.groups_by_id.insert(gid, name.to_string());
        Ok(record)
    }

    fn group_del(&self, name: &str) -> IdmResult<()> {
        let mut state = self.state.write().unwrap();
        let record = state.groups.remove(name).ok_or(IdmError::UnknownGroup)?;
        state.groups_by_id.remove(&record.gid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preloaded() {
        let idm = InMemoryIdm::default();
        assert_eq!(idm.lookup_user("root").unwrap().uid, ROOT_UID);
        assert_eq!(idm.admin_group().gid, ROOT_GID);
    }

    #[test]
    fn user_add_requires_existing_group() {
        let idm = InMemoryIdm::default();
        assert_eq!(idm.user_add("alice", "nosuch"), Err(IdmError::UnknownGroup));
        idm.group_add("staff").unwrap();
        let alice = idm.user_add("alice", "staff").unwrap();
        assert_eq!(idm.lookup_user_id(alice.uid).unwrap().name, "alice");
        assert_eq!(idm.user_add("alice", "staff"), Err(IdmError::UserExists));
    }
}
