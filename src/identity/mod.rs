//! Identity Store
//!
//! Users, groups and per-group roles. Usernames and group names are unique,
//! enforced through lock-free name indexes that are reserved before the
//! journal write and released again if it fails.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, info};

use crate::model::{Group, GroupId, Membership, Role, User, UserId, UserStatus, ROOT_GROUP};
use crate::store::{Change, Journal, RecordTable};
use crate::types::{GatekeeperError, Result};

const MAX_NAME_LEN: usize = 64;

/// Input for `create_user`
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub memberships: Vec<Membership>,
}

/// Partial update for `update_user`; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub status: Option<UserStatus>,
    /// Replaces the whole membership list
    pub memberships: Option<Vec<Membership>>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// What `bootstrap` had to create
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub root_group: Group,
    pub root_user: User,
    pub created_group: bool,
    pub created_user: bool,
}

fn index_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Validate a username: 1..=64 chars of `[A-Za-z0-9._-]`
pub fn validate_username(username: &str) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(GatekeeperError::Validation("Username is required".into()));
    }
    if username.len() > MAX_NAME_LEN {
        return Err(GatekeeperError::Validation(format!(
            "Username must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(GatekeeperError::Validation(
            "Username may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_group_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GatekeeperError::Validation("Group name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(GatekeeperError::Validation(format!(
            "Group name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Collapse repeated groups, the last role wins
fn no_group() -> GatekeeperError {
    GatekeeperError::Validation("An active user needs at least one group".into())
}

fn dedupe_memberships(memberships: Vec<Membership>) -> Vec<Membership> {
    let mut out: Vec<Membership> = Vec::with_capacity(memberships.len());
    for m in memberships {
        match out.iter_mut().find(|e| e.group_id == m.group_id) {
            Some(existing) => existing.role = m.role,
            None => out.push(m),
        }
    }
    out
}

pub struct IdentityStore {
    users: RecordTable<UserId, User>,
    groups: RecordTable<GroupId, Group>,
    usernames: DashMap<String, UserId>,
    group_names: DashMap<String, GroupId>,
    journal: Arc<dyn Journal>,
}

impl IdentityStore {
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            users: RecordTable::new(),
            groups: RecordTable::new(),
            usernames: DashMap::new(),
            group_names: DashMap::new(),
            journal,
        }
    }

    /// Load persisted rows. Only called before the store is shared.
    pub fn hydrate(&self, users: Vec<User>, groups: Vec<Group>) {
        for group in groups {
            self.group_names.insert(index_key(&group.name), group.id);
            self.groups.put(group.id, group);
        }
        for user in users {
            self.usernames.insert(index_key(&user.username), user.id);
            self.users.put(user.id, user);
        }
    }

    pub fn root_group_id(&self) -> Option<GroupId> {
        self.group_names.get(ROOT_GROUP).map(|id| *id)
    }

    /// Membership in the root group, read from the live membership list
    pub fn is_root_member(&self, user: &User) -> bool {
        self.root_group_id()
            .map(|root| user.role_in(root).is_some())
            .unwrap_or(false)
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        validate_username(&new.username)?;
        let username = new.username.trim().to_string();
        let memberships = dedupe_memberships(new.memberships);
        if new.status == UserStatus::Active && memberships.is_empty() {
            return Err(no_group());
        }
        let _held = self.hold_groups(&memberships).await?;

        let mut user = User::new(&username, new.name.trim(), new.password_hash, new.status);
        user.memberships = memberships;

        let key = index_key(&username);
        match self.usernames.entry(key.clone()) {
            Entry::Occupied(_) => return Err(GatekeeperError::DuplicateUsername(username)),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        if let Err(e) = self.journal.record(&Change::PutUser(user.clone())).await {
            self.usernames.remove(&key);
            return Err(e);
        }
        self.users.insert_new(user.id, user.clone());

        info!(user_id = %user.id, username = %user.username, status = %user.status, "User created");
        Ok(user)
    }

    /// All users ordered by username
    pub async fn list_users(&self) -> Vec<User> {
        let mut users = self.users.values().await;
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.users
            .get(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("user {id}")))
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        let id = self.usernames.get(&index_key(username)).map(|id| *id)?;
        self.users.get(&id).await
    }

    /// Exclusive lock on one user row
    pub async fn lock_user(&self, id: UserId) -> Result<OwnedRwLockWriteGuard<User>> {
        self.users
            .write(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("user {id}")))
    }

    /// Shared lock that keeps the user from being deleted while held
    pub async fn hold_user(&self, id: UserId) -> Result<OwnedRwLockReadGuard<User>> {
        self.users
            .read(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("user {id}")))
    }

    pub async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<User> {
        let memberships = update.memberships.map(dedupe_memberships);
        if memberships.as_ref().is_some_and(|list| list.is_empty()) {
            return Err(GatekeeperError::Validation(
                "At least one group is required".into(),
            ));
        }
        let _held = match &memberships {
            Some(list) => self.hold_groups(list).await?,
            None => Vec::new(),
        };

        let mut row = self.lock_user(id).await?;
        let mut next = row.clone();
        if let Some(name) = update.name {
            next.name = name.trim().to_string();
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(list) = memberships {
            next.memberships = list;
        }
        if next.is_active() && next.memberships.is_empty() {
            return Err(no_group());
        }
        next.touch();

        self.journal.record(&Change::PutUser(next.clone())).await?;
        *row = next.clone();

        info!(
            user_id = %id,
            status = %next.status,
            memberships = next.memberships.len(),
            "User updated"
        );
        Ok(next)
    }

    /// Add `user` to `group` with `role`. Re-adding is a no-op; a different
    /// role overwrites the old one.
    pub async fn add_membership(&self, id: UserId, group_id: GroupId, role: Role) -> Result<User> {
        let _held = self.hold_group(group_id).await?;
        let mut row = self.lock_user(id).await?;
        let mut next = row.clone();
        if !next.set_membership(group_id, role) {
            debug!(user_id = %id, group_id = %group_id, "Membership unchanged");
            return Ok(next);
        }
        next.touch();

        self.journal.record(&Change::PutUser(next.clone())).await?;
        *row = next.clone();

        info!(user_id = %id, group_id = %group_id, role = %role, "Membership set");
        Ok(next)
    }

    pub async fn remove_membership(&self, id: UserId, group_id: GroupId) -> Result<User> {
        let mut row = self.lock_user(id).await?;
        let mut next = row.clone();
        if !next.remove_membership(group_id) {
            return Ok(next);
        }
        if next.is_active() && next.memberships.is_empty() {
            return Err(no_group());
        }
        next.touch();

        self.journal.record(&Change::PutUser(next.clone())).await?;
        *row = next.clone();

        info!(user_id = %id, group_id = %group_id, "Membership removed");
        Ok(next)
    }

    /// Replace the password hash, optionally activating a pending account
    pub async fn set_password(
        &self,
        id: UserId,
        password_hash: String,
        activate_pending: bool,
    ) -> Result<User> {
        let mut row = self.lock_user(id).await?;
        let mut next = row.clone();
        next.password_hash = password_hash;
        if activate_pending && next.status == UserStatus::Pending {
            if next.memberships.is_empty() {
                return Err(no_group());
            }
            next.status = UserStatus::Active;
        }
        next.touch();

        self.journal.record(&Change::PutUser(next.clone())).await?;
        *row = next.clone();

        info!(user_id = %id, status = %next.status, "Password changed");
        Ok(next)
    }

    /// Delete a user. `guard` runs under the row lock and refuses the
    /// deletion by returning an error (typically `EntityReferenced`).
    pub async fn delete_user<F>(&self, id: UserId, guard: F) -> Result<User>
    where
        F: FnOnce(&User) -> Result<()>,
    {
        let row = self.lock_user(id).await?;
        guard(&*row)?;

        self.journal.record(&Change::RemoveUser(id)).await?;
        let user = row.clone();
        self.users.remove(&id);
        self.usernames.remove(&index_key(&user.username));
        drop(row);

        info!(user_id = %id, username = %user.username, "User deleted");
        Ok(user)
    }

    /// Users holding any role in `group_id`
    pub async fn members_of(&self, group_id: GroupId) -> Vec<User> {
        self.list_users()
            .await
            .into_iter()
            .filter(|u| u.role_in(group_id).is_some())
            .collect()
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub async fn create_group(&self, name: &str, description: &str) -> Result<Group> {
        validate_group_name(name)?;
        let group = Group::new(name.trim(), description.trim());

        let key = index_key(&group.name);
        match self.group_names.entry(key.clone()) {
            Entry::Occupied(_) => return Err(GatekeeperError::DuplicateGroupName(group.name)),
            Entry::Vacant(slot) => {
                slot.insert(group.id);
            }
        }

        if let Err(e) = self.journal.record(&Change::PutGroup(group.clone())).await {
            self.group_names.remove(&key);
            return Err(e);
        }
        self.groups.insert_new(group.id, group.clone());

        info!(group_id = %group.id, name = %group.name, "Group created");
        Ok(group)
    }

    /// All groups ordered by name
    pub async fn list_groups(&self) -> Vec<Group> {
        let mut groups = self.groups.values().await;
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Group> {
        self.groups
            .get(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("group {id}")))
    }

    pub async fn find_group_by_name(&self, name: &str) -> Option<Group> {
        let id = self.group_names.get(&index_key(name)).map(|id| *id)?;
        self.groups.get(&id).await
    }

    /// Shared lock that keeps `group_id` from being deleted while held
    pub async fn hold_group(&self, id: GroupId) -> Result<OwnedRwLockReadGuard<Group>> {
        self.groups
            .read(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("group {id}")))
    }

    async fn hold_groups(
        &self,
        memberships: &[Membership],
    ) -> Result<Vec<OwnedRwLockReadGuard<Group>>> {
        let mut ids: Vec<GroupId> = memberships.iter().map(|m| m.group_id).collect();
        ids.sort();
        ids.dedup();
        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            held.push(self.hold_group(id).await?);
        }
        Ok(held)
    }

    pub async fn update_group(&self, id: GroupId, update: GroupUpdate) -> Result<Group> {
        let mut row = self
            .groups
            .write(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("group {id}")))?;
        let mut next = row.clone();

        let mut reserved: Option<String> = None;
        if let Some(name) = update.name.as_deref().map(str::trim) {
            validate_group_name(name)?;
            if name != next.name {
                if next.is_root() {
                    return Err(GatekeeperError::Forbidden(
                        "The root group cannot be renamed".into(),
                    ));
                }
                let key = index_key(name);
                if key != index_key(&next.name) {
                    match self.group_names.entry(key.clone()) {
                        Entry::Occupied(_) => {
                            return Err(GatekeeperError::DuplicateGroupName(name.to_string()))
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(id);
                        }
                    }
                    reserved = Some(key);
                }
                next.name = name.to_string();
            }
        }
        if let Some(description) = update.description {
            next.description = description.trim().to_string();
        }
        next.updated_at = chrono::Utc::now();

        if let Err(e) = self.journal.record(&Change::PutGroup(next.clone())).await {
            if let Some(key) = reserved {
                self.group_names.remove(&key);
            }
            return Err(e);
        }
        if reserved.is_some() {
            self.group_names.remove(&index_key(&row.name));
        }
        *row = next.clone();

        info!(group_id = %id, name = %next.name, "Group updated");
        Ok(next)
    }

    /// Delete a group. The root group is never deletable and groups with
    /// members are refused. `guard` runs while the group is write-locked and
    /// adds the checks this store cannot see, such as owned entities.
    pub async fn delete_group<F, Fut>(&self, id: GroupId, guard: F) -> Result<Group>
    where
        F: FnOnce(Group) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let row = self
            .groups
            .write(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("group {id}")))?;
        if row.is_root() {
            return Err(GatekeeperError::Forbidden(
                "The root group cannot be deleted".into(),
            ));
        }
        guard(row.clone()).await?;

        let members = self.members_of(id).await.len();
        if members > 0 {
            return Err(GatekeeperError::EntityReferenced(format!(
                "group '{}' still has {} member(s)",
                row.name, members
            )));
        }

        self.journal.record(&Change::RemoveGroup(id)).await?;
        let group = row.clone();
        self.groups.remove(&id);
        self.group_names.remove(&index_key(&group.name));
        drop(row);

        info!(group_id = %id, name = %group.name, "Group deleted");
        Ok(group)
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Make sure the root group exists and `root_username` is an active admin
    /// in it. `password_hash` is only used when the user has to be created.
    pub async fn bootstrap(&self, root_username: &str, password_hash: String) -> Result<Bootstrap> {
        let (root_group, created_group) = match self.find_group_by_name(ROOT_GROUP).await {
            Some(group) => (group, false),
            None => (
                self.create_group(ROOT_GROUP, "Global administrators").await?,
                true,
            ),
        };

        let (root_user, created_user) = match self.find_by_username(root_username).await {
            Some(user) => {
                let mut user = self.add_membership(user.id, root_group.id, Role::Admin).await?;
                if !user.is_active() {
                    user = self
                        .update_user(
                            user.id,
                            UserUpdate {
                                status: Some(UserStatus::Active),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                (user, false)
            }
            None => {
                let user = self
                    .create_user(NewUser {
                        username: root_username.to_string(),
                        name: "Root".into(),
                        password_hash,
                        status: UserStatus::Active,
                        memberships: vec![Membership {
                            group_id: root_group.id,
                            role: Role::Admin,
                        }],
                    })
                    .await?;
                (user, true)
            }
        };

        Ok(Bootstrap {
            root_group,
            root_user,
            created_group,
            created_user,
        })
    }
}
