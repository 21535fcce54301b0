//! Authorization Engine
//!
//! `can(principal, action, resource)` is a pure decision over the caller's
//! live memberships and a description of the resource. Nothing here is
//! cached: the root capability is recomputed from memberships on every call
//! site that builds a `Principal`.

use std::fmt;

use crate::model::{GroupId, Membership, Role, User, UserId};
use crate::types::{GatekeeperError, Result};

/// The caller as seen by the authorization engine
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub active: bool,
    pub memberships: Vec<Membership>,
    /// Member (any role) of the root group
    pub root: bool,
}

impl Principal {
    pub fn new(user: &User, root_group: Option<GroupId>) -> Self {
        let root = root_group
            .map(|id| user.role_in(id).is_some())
            .unwrap_or(false);
        Self {
            user_id: user.id,
            username: user.username.clone(),
            active: user.is_active(),
            memberships: user.memberships.clone(),
            root,
        }
    }

    pub fn role_in(&self, group_id: GroupId) -> Option<Role> {
        self.memberships
            .iter()
            .find(|m| m.group_id == group_id)
            .map(|m| m.role)
    }

    pub fn is_member_of(&self, group_id: GroupId) -> bool {
        self.role_in(group_id).is_some()
    }

    pub fn is_admin_of(&self, group_id: GroupId) -> bool {
        self.role_in(group_id) == Some(Role::Admin)
    }

    /// Admin of `group_id` or root member
    pub fn governs(&self, group_id: GroupId) -> bool {
        self.root || self.is_admin_of(group_id)
    }
}

/// Operational and metadata changes on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    Describe,
    Pause,
    Resume,
    Empty,
    Delete,
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityAction::Describe => write!(f, "describe"),
            EntityAction::Pause => write!(f, "pause"),
            EntityAction::Resume => write!(f, "resume"),
            EntityAction::Empty => write!(f, "empty"),
            EntityAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// List or view entities
    Read,
    Bookmark,
    /// File a claim naming `target_group` as the new owner
    Claim { target_group: GroupId },
    Mutate(EntityAction),
    ResolveTicket,
    ViewTicket,
    /// Create or edit groups
    ManageGroups,
    DeleteGroup,
    /// List, create, edit or delete users and issue reset tokens
    ManageUsers,
    /// Force a broker synchronisation
    SyncBroker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The entity listing as a whole
    Catalog,
    Entity {
        owner: Option<GroupId>,
    },
    Ticket {
        requester: UserId,
        target_group: GroupId,
        resolved_by: Option<UserId>,
    },
    Group {
        root: bool,
    },
    Users,
    Broker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No session
    Anonymous,
    /// Session of a pending or disabled account
    Inactive,
    NotPermitted(String),
    /// The request is permitted in principle but contradicts current state
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(Denial::NotPermitted(reason.into()))
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(Denial::Anonymous) => {
                Err(GatekeeperError::Unauthorized("Authentication required".into()))
            }
            Decision::Deny(Denial::Inactive) => {
                Err(GatekeeperError::Forbidden("Account is not active".into()))
            }
            Decision::Deny(Denial::NotPermitted(reason)) => Err(GatekeeperError::Forbidden(reason)),
            Decision::Deny(Denial::Conflict(reason)) => Err(GatekeeperError::Conflict(reason)),
        }
    }
}

/// Decide whether `principal` may perform `action` on `resource`
pub fn can(principal: Option<&Principal>, action: Action, resource: Resource) -> Decision {
    let Some(p) = principal else {
        return Decision::Deny(Denial::Anonymous);
    };
    if !p.active {
        return Decision::Deny(Denial::Inactive);
    }

    match (action, resource) {
        (Action::Read, Resource::Catalog | Resource::Entity { .. }) => Decision::Allow,

        (Action::Bookmark, Resource::Entity { .. }) => Decision::Allow,

        (Action::Claim { target_group }, Resource::Entity { owner }) => {
            if !p.root && !p.is_member_of(target_group) {
                return Decision::deny("You can only claim on behalf of a group you belong to");
            }
            match owner {
                None => Decision::Allow,
                Some(current) if current == target_group => Decision::Deny(Denial::Conflict(
                    "The entity is already owned by that group".into(),
                )),
                Some(current) if p.governs(current) => Decision::Allow,
                Some(_) => Decision::deny(
                    "The entity is owned by another group; only its admins can transfer it",
                ),
            }
        }

        (Action::Mutate(op), Resource::Entity { owner }) => match owner {
            _ if p.root => Decision::Allow,
            Some(group) if p.is_admin_of(group) => Decision::Allow,
            Some(_) => Decision::deny(format!(
                "Only admins of the owning group can {op} this entity"
            )),
            None => Decision::deny(format!("Only root members can {op} an unclaimed entity")),
        },

        (
            Action::ResolveTicket,
            Resource::Ticket {
                requester,
                target_group,
                ..
            },
        ) => {
            if requester == p.user_id {
                Decision::deny("You cannot resolve your own ticket")
            } else if p.governs(target_group) {
                Decision::Allow
            } else {
                Decision::deny("You are not an assignee of this ticket")
            }
        }

        (
            Action::ViewTicket,
            Resource::Ticket {
                requester,
                target_group,
                resolved_by,
            },
        ) => {
            if requester == p.user_id
                || resolved_by == Some(p.user_id)
                || p.governs(target_group)
            {
                Decision::Allow
            } else {
                Decision::deny("You are not involved in this ticket")
            }
        }

        (Action::DeleteGroup, Resource::Group { root: true }) => {
            Decision::deny("The root group cannot be deleted")
        }

        (Action::ManageGroups | Action::DeleteGroup, Resource::Group { .. })
        | (Action::ManageUsers, Resource::Users)
        | (Action::SyncBroker, Resource::Broker) => {
            if p.root {
                Decision::Allow
            } else {
                Decision::deny("Root group membership required")
            }
        }

        (action, resource) => Decision::deny(format!(
            "{action:?} does not apply to {resource:?}"
        )),
    }
}
