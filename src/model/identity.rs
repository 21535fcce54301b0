//! Users, groups and memberships

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::GatekeeperError;

pub type UserId = Uuid;
pub type GroupId = Uuid;

/// Name of the protected group whose members hold global authority
pub const ROOT_GROUP: &str = "root";

/// Role of a user inside one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Member => write!(f, "member"),
        }
    }
}

impl FromStr for Role {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" | "user" => Ok(Role::Member),
            other => Err(GatekeeperError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// Account lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Waiting for a signup approval or for the first password to be set
    Pending,
    Active,
    Disabled,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Pending => write!(f, "pending"),
            UserStatus::Active => write!(f, "active"),
            UserStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "disabled" | "inactive" => Ok(UserStatus::Disabled),
            other => Err(GatekeeperError::Validation(format!(
                "unknown user status '{other}'"
            ))),
        }
    }
}

/// A user's role in one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    /// Argon2 PHC string
    pub password_hash: String,
    pub status: UserStatus,
    pub memberships: Vec<Membership>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, name: &str, password_hash: String, status: UserStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            name: name.to_string(),
            password_hash,
            status,
            memberships: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Role held in `group_id`, if any
    pub fn role_in(&self, group_id: GroupId) -> Option<Role> {
        self.memberships
            .iter()
            .find(|m| m.group_id == group_id)
            .map(|m| m.role)
    }

    pub fn is_admin_of(&self, group_id: GroupId) -> bool {
        self.role_in(group_id) == Some(Role::Admin)
    }

    /// Add or overwrite a membership. Returns true when anything changed.
    pub fn set_membership(&mut self, group_id: GroupId, role: Role) -> bool {
        match self.memberships.iter_mut().find(|m| m.group_id == group_id) {
            Some(existing) if existing.role == role => false,
            Some(existing) => {
                existing.role = role;
                true
            }
            None => {
                self.memberships.push(Membership { group_id, role });
                true
            }
        }
    }

    /// Drop the membership in `group_id`. Returns true when it existed.
    pub fn remove_membership(&mut self, group_id: GroupId) -> bool {
        let before = self.memberships.len();
        self.memberships.retain(|m| m.group_id != group_id);
        before != self.memberships.len()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_GROUP
    }
}
