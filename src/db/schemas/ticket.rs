//! Ticket document schema
//!
//! The kind-specific payload is flattened into optional fields so tickets of
//! both kinds live in one collection and share the status index.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::{parse_field, parse_id};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Ticket, TicketEvent, TicketKind, TicketPayload};
use crate::types::GatekeeperError;

pub const TICKET_COLLECTION: &str = "tickets";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TicketEventDoc {
    pub action: String,
    pub actor: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub at: Option<DateTime>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TicketDoc {
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// signup_application or entity_claim
    pub kind: String,

    pub title: String,

    pub requester: String,

    /// pending, approved or rejected
    pub status: String,

    /// Group whose admins resolve the ticket
    pub group_id: String,

    /// Applicant (signup)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Requested role (signup)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Claimed entity (claim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Owner observed when the claim was filed (claim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_owner: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub resolved_by: Option<String>,

    #[serde(default)]
    pub resolution_reason: Option<String>,

    #[serde(default)]
    pub history: Vec<TicketEventDoc>,
}

impl From<&Ticket> for TicketDoc {
    fn from(ticket: &Ticket) -> Self {
        let mut doc = Self {
            _id: ticket.id.to_string(),
            metadata: Metadata::at(ticket.created_at, ticket.updated_at),
            kind: ticket.kind().to_string(),
            title: ticket.title.clone(),
            requester: ticket.requester.to_string(),
            status: ticket.status.to_string(),
            group_id: ticket.target_group().to_string(),
            reason: ticket.reason.clone(),
            resolved_by: ticket.resolved_by.map(|u| u.to_string()),
            resolution_reason: ticket.resolution_reason.clone(),
            history: ticket
                .history
                .iter()
                .map(|e| TicketEventDoc {
                    action: e.action.to_string(),
                    actor: e.actor.to_string(),
                    comment: e.comment.clone(),
                    at: Some(DateTime::from_chrono(e.at)),
                })
                .collect(),
            ..Default::default()
        };

        match &ticket.payload {
            TicketPayload::SignupApplication { user_id, role, .. } => {
                doc.user_id = Some(user_id.to_string());
                doc.role = Some(role.to_string());
            }
            TicketPayload::EntityClaim {
                entity_id,
                previous_owner,
                ..
            } => {
                doc.entity_id = Some(entity_id.to_string());
                doc.previous_owner = previous_owner.map(|g| g.to_string());
            }
        }
        doc
    }
}

fn required<'a>(
    field: &'a Option<String>,
    name: &str,
    id: &str,
) -> Result<&'a str, GatekeeperError> {
    field
        .as_deref()
        .ok_or_else(|| GatekeeperError::Database(format!("ticket {id} is missing {name}")))
}

impl TryFrom<TicketDoc> for Ticket {
    type Error = GatekeeperError;

    fn try_from(doc: TicketDoc) -> Result<Self, Self::Error> {
        let group_id = parse_id(&doc.group_id, "group")?;
        let payload = match parse_field::<TicketKind>(&doc.kind, "ticket kind")? {
            TicketKind::SignupApplication => TicketPayload::SignupApplication {
                user_id: parse_id(required(&doc.user_id, "user_id", &doc._id)?, "user")?,
                group_id,
                role: parse_field(required(&doc.role, "role", &doc._id)?, "role")?,
            },
            TicketKind::EntityClaim => TicketPayload::EntityClaim {
                entity_id: parse_id(required(&doc.entity_id, "entity_id", &doc._id)?, "entity")?,
                group_id,
                previous_owner: doc
                    .previous_owner
                    .as_deref()
                    .map(|g| parse_id(g, "group"))
                    .transpose()?,
            },
        };

        let history = doc
            .history
            .iter()
            .map(|e| {
                Ok(TicketEvent {
                    action: parse_field(&e.action, "ticket action")?,
                    actor: parse_id(&e.actor, "user")?,
                    comment: e.comment.clone(),
                    at: e.at.map(|d| d.to_chrono()).unwrap_or_else(|| doc.metadata.created()),
                })
            })
            .collect::<Result<Vec<_>, GatekeeperError>>()?;

        Ok(Ticket {
            id: parse_id(&doc._id, "ticket")?,
            title: doc.title,
            payload,
            requester: parse_id(&doc.requester, "user")?,
            status: parse_field(&doc.status, "ticket status")?,
            reason: doc.reason,
            created_at: doc.metadata.created(),
            updated_at: doc.metadata.updated(),
            resolved_by: doc
                .resolved_by
                .as_deref()
                .map(|u| parse_id(u, "user"))
                .transpose()?,
            resolution_reason: doc.resolution_reason,
            history,
        })
    }
}

impl IntoIndexes for TicketDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "status": 1, "group_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_group_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "requester": 1 },
                Some(
                    IndexOptions::builder()
                        .name("requester_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TicketDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resolution, Role, TicketStatus};
    use uuid::Uuid;

    #[test]
    fn test_resolved_signup_survives_conversion() {
        let applicant = Uuid::new_v4();
        let ticket = Ticket::new(
            "Signup request by Dana (dana)".into(),
            TicketPayload::SignupApplication {
                user_id: applicant,
                group_id: Uuid::new_v4(),
                role: Role::Member,
            },
            applicant,
            Some("new on the team".into()),
        );
        let resolver = Uuid::new_v4();
        let resolved = ticket.resolved(Resolution::Approve, resolver, Some("welcome".into()));

        let doc = TicketDoc::from(&resolved);
        assert_eq!(doc.kind, "signup_application");
        assert_eq!(doc.status, "approved");
        assert!(doc.entity_id.is_none());

        let back = Ticket::try_from(doc).unwrap();
        assert_eq!(back.payload, resolved.payload);
        assert_eq!(back.status, TicketStatus::Approved);
        assert_eq!(back.resolved_by, Some(resolver));
        assert_eq!(back.history.len(), 2);
    }

    #[test]
    fn test_claim_without_entity_is_corrupt() {
        let ticket = Ticket::new(
            "Claim topic orders for group payments".into(),
            TicketPayload::EntityClaim {
                entity_id: Uuid::new_v4(),
                group_id: Uuid::new_v4(),
                previous_owner: None,
            },
            Uuid::new_v4(),
            None,
        );
        let mut doc = TicketDoc::from(&ticket);
        doc.entity_id = None;
        assert!(matches!(Ticket::try_from(doc), Err(GatekeeperError::Database(_))));
    }
}
