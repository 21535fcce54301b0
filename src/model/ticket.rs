//! Tickets: pending requests that an authorized approver resolves once

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::EntityId;
use super::identity::{GroupId, Role, UserId};
use crate::types::GatekeeperError;

pub type TicketId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    SignupApplication,
    EntityClaim,
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketKind::SignupApplication => write!(f, "signup_application"),
            TicketKind::EntityClaim => write!(f, "entity_claim"),
        }
    }
}

impl FromStr for TicketKind {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup_application" => Ok(TicketKind::SignupApplication),
            "entity_claim" => Ok(TicketKind::EntityClaim),
            other => Err(GatekeeperError::Validation(format!(
                "unknown ticket kind '{other}'"
            ))),
        }
    }
}

/// Kind-specific part of a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketPayload {
    /// Activate `user_id` and add it to `group_id` with `role`
    SignupApplication {
        user_id: UserId,
        group_id: GroupId,
        role: Role,
    },
    /// Hand `entity_id` over to `group_id`
    EntityClaim {
        entity_id: EntityId,
        group_id: GroupId,
        /// Owner observed when the claim was filed
        previous_owner: Option<GroupId>,
    },
}

impl TicketPayload {
    pub fn kind(&self) -> TicketKind {
        match self {
            TicketPayload::SignupApplication { .. } => TicketKind::SignupApplication,
            TicketPayload::EntityClaim { .. } => TicketKind::EntityClaim,
        }
    }

    /// Group whose admins may resolve the ticket
    pub fn target_group(&self) -> GroupId {
        match self {
            TicketPayload::SignupApplication { group_id, .. }
            | TicketPayload::EntityClaim { group_id, .. } => *group_id,
        }
    }

    /// Subject id used for pending uniqueness (applicant or entity)
    pub fn subject(&self) -> Uuid {
        match self {
            TicketPayload::SignupApplication { user_id, .. } => *user_id,
            TicketPayload::EntityClaim { entity_id, .. } => *entity_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Approved,
    Rejected,
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Pending)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Approved => write!(f, "approved"),
            TicketStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "approved" => Ok(TicketStatus::Approved),
            "rejected" => Ok(TicketStatus::Rejected),
            other => Err(GatekeeperError::Validation(format!(
                "unknown ticket status '{other}'"
            ))),
        }
    }
}

/// Verdict passed to `resolve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    pub fn outcome(&self) -> TicketStatus {
        match self {
            Resolution::Approve => TicketStatus::Approved,
            Resolution::Reject => TicketStatus::Rejected,
        }
    }
}

impl FromStr for Resolution {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Resolution::Approve),
            "reject" | "rejected" => Ok(Resolution::Reject),
            other => Err(GatekeeperError::Validation(format!(
                "action must be 'approve' or 'reject', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketAction {
    Created,
    Approved,
    Rejected,
}

impl fmt::Display for TicketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketAction::Created => write!(f, "created"),
            TicketAction::Approved => write!(f, "approved"),
            TicketAction::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for TicketAction {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TicketAction::Created),
            "approved" => Ok(TicketAction::Approved),
            "rejected" => Ok(TicketAction::Rejected),
            other => Err(GatekeeperError::Validation(format!(
                "unknown ticket action '{other}'"
            ))),
        }
    }
}

/// One entry of the append-only ticket history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEvent {
    pub action: TicketAction,
    pub actor: UserId,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub payload: TicketPayload,
    pub requester: UserId,
    pub status: TicketStatus,
    /// Free text supplied by the requester
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_by: Option<UserId>,
    pub resolution_reason: Option<String>,
    pub history: Vec<TicketEvent>,
}

impl Ticket {
    pub fn new(
        title: String,
        payload: TicketPayload,
        requester: UserId,
        reason: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            payload,
            requester,
            status: TicketStatus::Pending,
            reason,
            created_at: now,
            updated_at: now,
            resolved_by: None,
            resolution_reason: None,
            history: vec![TicketEvent {
                action: TicketAction::Created,
                actor: requester,
                comment: None,
                at: now,
            }],
        }
    }

    pub fn kind(&self) -> TicketKind {
        self.payload.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TicketStatus::Pending
    }

    pub fn target_group(&self) -> GroupId {
        self.payload.target_group()
    }

    /// Copy of this ticket in its resolved state. The receiver is left
    /// untouched so the caller can persist first and swap afterwards.
    pub fn resolved(
        &self,
        resolution: Resolution,
        resolver: UserId,
        reason: Option<String>,
    ) -> Ticket {
        let now = Utc::now();
        let mut next = self.clone();
        next.status = resolution.outcome();
        next.resolved_by = Some(resolver);
        next.resolution_reason = reason.clone();
        next.updated_at = now;
        next.history.push(TicketEvent {
            action: match resolution {
                Resolution::Approve => TicketAction::Approved,
                Resolution::Reject => TicketAction::Rejected,
            },
            actor: resolver,
            comment: reason,
            at: now,
        });
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim() -> Ticket {
        Ticket::new(
            "Claim topic orders for group payments".into(),
            TicketPayload::EntityClaim {
                entity_id: Uuid::new_v4(),
                group_id: Uuid::new_v4(),
                previous_owner: None,
            },
            Uuid::new_v4(),
            None,
        )
    }

    #[test]
    fn test_new_ticket_is_pending_with_created_event() {
        let ticket = claim();
        assert!(ticket.is_pending());
        assert_eq!(ticket.history.len(), 1);
        assert_eq!(ticket.history[0].action, TicketAction::Created);
        assert_eq!(ticket.history[0].actor, ticket.requester);
    }

    #[test]
    fn test_resolved_leaves_original_untouched() {
        let ticket = claim();
        let resolver = Uuid::new_v4();
        let next = ticket.resolved(Resolution::Reject, resolver, Some("no".into()));

        assert!(ticket.is_pending());
        assert_eq!(next.status, TicketStatus::Rejected);
        assert_eq!(next.resolved_by, Some(resolver));
        assert_eq!(next.history.len(), 2);
        assert_eq!(next.history[1].comment.as_deref(), Some("no"));
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("approve".parse::<Resolution>().unwrap(), Resolution::Approve);
        assert_eq!("Reject".parse::<Resolution>().unwrap(), Resolution::Reject);
        assert!("maybe".parse::<Resolution>().is_err());
    }
}
