//! Request and response shapes of the workflow operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::broker::EntityStats;
use crate::model::{
    Entity, EntityId, EntityKind, Group, GroupId, Membership, Role, Ticket, TicketAction,
    TicketEvent, TicketId, TicketKind, TicketPayload, TicketStatus, User, UserId, UserStatus,
};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
    pub confirm_password: String,
    pub group_id: GroupId,
    /// Requested role, `member` when absent
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityQuery {
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub owner: Option<GroupId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub group_id: GroupId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub memberships: Option<Vec<Membership>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub name: String,
}

impl UserSummary {
    pub fn of(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
        }
    }

    /// Placeholder for a user that no longer exists
    pub fn missing(id: UserId) -> Self {
        Self {
            id,
            username: "(deleted)".into(),
            name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
}

impl GroupSummary {
    pub fn lookup(id: GroupId, groups: &HashMap<GroupId, Group>) -> Self {
        Self {
            id,
            name: groups
                .get(&id)
                .map(|g| g.name.clone())
                .unwrap_or_else(|| "(deleted)".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupView {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<Group> for GroupView {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            created_at: group.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipView {
    pub group_id: GroupId,
    pub group_name: String,
    pub role: Role,
}

/// A user without credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub status: UserStatus,
    pub memberships: Vec<MembershipView>,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserView {
    pub fn build(user: &User, groups: &HashMap<GroupId, Group>, is_root: bool) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            status: user.status,
            memberships: user
                .memberships
                .iter()
                .map(|m| MembershipView {
                    group_id: m.group_id,
                    group_name: GroupSummary::lookup(m.group_id, groups).name,
                    role: m.role,
                })
                .collect(),
            is_root,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub expires_in: u64,
    pub user: UserView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupReceipt {
    pub application_id: TicketId,
    pub user_id: UserId,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetIssued {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedUser {
    pub user: UserView,
    pub reset: ResetIssued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetLookup {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityView {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub topic: String,
    pub owner: Option<GroupSummary>,
    pub description: String,
    pub paused: bool,
    /// Bookmarked by the caller, never by anyone else
    pub bookmarked: bool,
    pub gone: bool,
    pub nsqd_hosts: Vec<String>,
    /// The caller may edit or operate on this entity
    pub can_manage: bool,
    pub updated_at: DateTime<Utc>,
}

impl EntityView {
    pub fn build(
        entity: &Entity,
        groups: &HashMap<GroupId, Group>,
        bookmarked: bool,
        can_manage: bool,
    ) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind(),
            name: entity.name().to_string(),
            topic: entity.reference.topic_name().to_string(),
            owner: entity.owner.map(|id| GroupSummary::lookup(id, groups)),
            description: entity.description.clone(),
            paused: entity.paused,
            bookmarked,
            gone: entity.gone,
            nsqd_hosts: entity.nsqd_hosts.clone(),
            can_manage,
            updated_at: entity.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDetail {
    pub entity: EntityView,
    /// Channels of a topic; empty for channels
    pub channels: Vec<EntityView>,
    /// The caller's own pending claim on this entity
    pub pending_claim: Option<TicketId>,
    /// Live broker counters; absent when the broker could not be reached
    pub stats: Option<EntityStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkState {
    pub entity_id: EntityId,
    pub bookmarked: bool,
}

/// What a ticket is about
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectView {
    SignupApplication {
        applicant: UserSummary,
        role: Role,
    },
    EntityClaim {
        entity_id: EntityId,
        entity_kind: EntityKind,
        entity_name: String,
        previous_owner: Option<GroupSummary>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketView {
    pub id: TicketId,
    pub kind: TicketKind,
    pub title: String,
    pub status: TicketStatus,
    pub requester: UserSummary,
    pub target_group: GroupSummary,
    pub subject: SubjectView,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_by: Option<UserSummary>,
    pub resolution_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEventView {
    pub action: TicketAction,
    pub actor: UserSummary,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDetail {
    pub ticket: TicketView,
    pub history: Vec<TicketEventView>,
    /// The caller could approve or reject it now
    pub can_resolve: bool,
}

/// Lookup tables used to render tickets
pub(crate) struct Directory {
    pub users: HashMap<UserId, User>,
    pub groups: HashMap<GroupId, Group>,
    pub entities: HashMap<EntityId, Entity>,
}

impl Directory {
    pub fn user(&self, id: UserId) -> UserSummary {
        self.users
            .get(&id)
            .map(UserSummary::of)
            .unwrap_or_else(|| UserSummary::missing(id))
    }

    pub fn ticket(&self, ticket: &Ticket) -> TicketView {
        let subject = match &ticket.payload {
            TicketPayload::SignupApplication { user_id, role, .. } => {
                SubjectView::SignupApplication {
                    applicant: self.user(*user_id),
                    role: *role,
                }
            }
            TicketPayload::EntityClaim {
                entity_id,
                previous_owner,
                ..
            } => {
                let (entity_kind, entity_name) = match self.entities.get(entity_id) {
                    Some(entity) => (entity.kind(), entity.reference.key()),
                    None => (EntityKind::Topic, "(unknown)".to_string()),
                };
                SubjectView::EntityClaim {
                    entity_id: *entity_id,
                    entity_kind,
                    entity_name,
                    previous_owner: previous_owner.map(|g| GroupSummary::lookup(g, &self.groups)),
                }
            }
        };

        TicketView {
            id: ticket.id,
            kind: ticket.kind(),
            title: ticket.title.clone(),
            status: ticket.status,
            requester: self.user(ticket.requester),
            target_group: GroupSummary::lookup(ticket.target_group(), &self.groups),
            subject,
            reason: ticket.reason.clone(),
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            resolved_by: ticket.resolved_by.map(|id| self.user(id)),
            resolution_reason: ticket.resolution_reason.clone(),
        }
    }

    pub fn event(&self, event: &TicketEvent) -> TicketEventView {
        TicketEventView {
            action: event.action,
            actor: self.user(event.actor),
            comment: event.comment.clone(),
            at: event.at,
        }
    }
}
