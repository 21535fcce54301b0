//! Ticket Engine
//!
//! Generic pending requests with a single `pending -> approved | rejected`
//! transition. Approval applies the kind-specific side effect and the status
//! change together: both records are journaled while the ticket row and the
//! affected entity or user row are locked, and only then swapped in memory.
//!
//! Lock order is ticket, then entity, then user.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authz::{can, Action, Principal, Resource};
use crate::identity::IdentityStore;
use crate::model::{
    GroupId, Page, PageRequest, Resolution, Ticket, TicketId, TicketPayload, UserId, UserStatus,
};
use crate::registry::EntityRegistry;
use crate::store::{Change, Journal, RecordTable, Step};
use crate::types::{GatekeeperError, Result};

/// Key of the pending index: (requester, applicant or entity)
type PendingKey = (UserId, Uuid);

#[derive(Debug, Clone, Copy)]
struct PendingSlot {
    ticket_id: TicketId,
    target_group: GroupId,
    /// Applicant of a signup ticket
    subject_user: Option<UserId>,
}

impl PendingSlot {
    fn of(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            target_group: ticket.target_group(),
            subject_user: match ticket.payload {
                TicketPayload::SignupApplication { user_id, .. } => Some(user_id),
                TicketPayload::EntityClaim { .. } => None,
            },
        }
    }
}

fn pending_key(ticket: &Ticket) -> PendingKey {
    (ticket.requester, ticket.payload.subject())
}

/// Authorization view of a ticket
pub fn resource_of(ticket: &Ticket) -> Resource {
    Resource::Ticket {
        requester: ticket.requester,
        target_group: ticket.target_group(),
        resolved_by: ticket.resolved_by,
    }
}

fn newest_first(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

pub struct TicketEngine {
    tickets: RecordTable<TicketId, Ticket>,
    pending: DashMap<PendingKey, PendingSlot>,
    identity: Arc<IdentityStore>,
    registry: Arc<EntityRegistry>,
    journal: Arc<dyn Journal>,
}

impl TicketEngine {
    pub fn new(
        identity: Arc<IdentityStore>,
        registry: Arc<EntityRegistry>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            tickets: RecordTable::new(),
            pending: DashMap::new(),
            identity,
            registry,
            journal,
        }
    }

    /// Load persisted tickets and rebuild the pending index
    pub fn hydrate(&self, tickets: Vec<Ticket>) {
        for ticket in tickets {
            if ticket.is_pending() {
                self.pending.insert(pending_key(&ticket), PendingSlot::of(&ticket));
            }
            self.tickets.put(ticket.id, ticket);
        }
    }

    /// Open a new pending ticket. At most one ticket is pending per
    /// (requester, subject); a second one fails with `DuplicatePending`.
    pub async fn create(
        &self,
        title: String,
        payload: TicketPayload,
        requester: UserId,
        reason: Option<String>,
    ) -> Result<Ticket> {
        let ticket = Ticket::new(title, payload, requester, reason);
        let key = pending_key(&ticket);

        match self.pending.entry(key) {
            Entry::Occupied(slot) => {
                return Err(GatekeeperError::DuplicatePending(format!(
                    "ticket {} is already pending for this request",
                    slot.get().ticket_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingSlot::of(&ticket));
            }
        }

        if let Err(e) = self.journal.record(&Change::PutTicket(ticket.clone())).await {
            self.pending.remove_if(&key, |_, slot| slot.ticket_id == ticket.id);
            return Err(e);
        }
        self.tickets.insert_new(ticket.id, ticket.clone());

        info!(
            ticket_id = %ticket.id,
            kind = %ticket.kind(),
            requester = %requester,
            group_id = %ticket.target_group(),
            "Ticket created"
        );
        Ok(ticket)
    }

    pub async fn get(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("ticket {id}")))
    }

    /// Resolve a pending ticket exactly once.
    ///
    /// Fails with `NotFound`, `Forbidden` or `AlreadyResolved`, checked in
    /// that order, before touching anything. On approve, a failure applying
    /// the side effect leaves the ticket pending and is returned to the caller.
    pub async fn resolve(
        &self,
        id: TicketId,
        resolution: Resolution,
        resolver: &Principal,
        reason: Option<String>,
    ) -> Result<Ticket> {
        let mut row = self
            .tickets
            .write(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("ticket {id}")))?;
        if let Err(e) = can(Some(resolver), Action::ResolveTicket, resource_of(&row)).into_result() {
            warn!(ticket_id = %id, user_id = %resolver.user_id, "Ticket resolution denied: {}", e);
            return Err(e);
        }
        if !row.is_pending() {
            return Err(GatekeeperError::AlreadyResolved(id));
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let next = row.resolved(resolution, resolver.user_id, reason);
        let ticket_step = Step::new(
            Change::PutTicket(next.clone()),
            Change::PutTicket(row.clone()),
        );

        match (resolution, row.payload.clone()) {
            (Resolution::Reject, _) => {
                self.journal.record(&ticket_step.apply).await?;
                *row = next.clone();
            }

            (
                Resolution::Approve,
                TicketPayload::EntityClaim {
                    entity_id,
                    group_id,
                    previous_owner,
                },
            ) => {
                let mut entity = self.registry.lock(entity_id).await?;
                if entity.owner != previous_owner {
                    return Err(GatekeeperError::Conflict(format!(
                        "ownership of {} changed since the claim was filed",
                        entity.reference
                    )));
                }
                let mut owned = entity.clone();
                owned.owner = Some(group_id);
                owned.touch();

                self.journal
                    .commit(&[
                        Step::new(
                            Change::PutEntity(owned.clone()),
                            Change::PutEntity(entity.clone()),
                        ),
                        ticket_step,
                    ])
                    .await?;
                *entity = owned;
                *row = next.clone();

                info!(
                    ticket_id = %id,
                    entity = %entity.reference,
                    group_id = %group_id,
                    "Entity ownership transferred"
                );
            }

            (
                Resolution::Approve,
                TicketPayload::SignupApplication {
                    user_id,
                    group_id,
                    role,
                },
            ) => {
                let mut user = self.identity.lock_user(user_id).await?;
                if user.status == UserStatus::Disabled {
                    return Err(GatekeeperError::Conflict(format!(
                        "applicant {} has been disabled",
                        user.username
                    )));
                }
                let mut activated = user.clone();
                activated.status = UserStatus::Active;
                activated.set_membership(group_id, role);
                activated.touch();

                self.journal
                    .commit(&[
                        Step::new(
                            Change::PutUser(activated.clone()),
                            Change::PutUser(user.clone()),
                        ),
                        ticket_step,
                    ])
                    .await?;
                *user = activated;
                *row = next.clone();

                info!(
                    ticket_id = %id,
                    user_id = %user_id,
                    group_id = %group_id,
                    role = %role,
                    "Applicant activated"
                );
            }
        }

        self.pending
            .remove_if(&pending_key(&next), |_, slot| slot.ticket_id == id);
        drop(row);

        info!(
            ticket_id = %id,
            action = %next.status,
            resolver = %resolver.user_id,
            "Ticket resolved"
        );
        Ok(next)
    }

    /// Tickets `principal` may resolve, newest first. Assignment is derived
    /// from current roles, never stored.
    pub async fn list_assigned(
        &self,
        principal: &Principal,
        include_resolved: bool,
        page: PageRequest,
    ) -> Page<Ticket> {
        let mut assigned: Vec<Ticket> = self
            .tickets
            .values()
            .await
            .into_iter()
            .filter(|t| include_resolved || t.is_pending())
            .filter(|t| can(Some(principal), Action::ResolveTicket, resource_of(t)).is_allowed())
            .collect();
        newest_first(&mut assigned);
        Page::slice(assigned, page)
    }

    /// Tickets filed by `requester`, newest first
    pub async fn list_requested(&self, requester: UserId, page: PageRequest) -> Page<Ticket> {
        let mut mine: Vec<Ticket> = self
            .tickets
            .values()
            .await
            .into_iter()
            .filter(|t| t.requester == requester)
            .collect();
        newest_first(&mut mine);
        Page::slice(mine, page)
    }

    /// A pending ticket targeting `group_id`, if any
    pub fn pending_for_group(&self, group_id: GroupId) -> Option<TicketId> {
        self.pending
            .iter()
            .find(|slot| slot.target_group == group_id)
            .map(|slot| slot.ticket_id)
    }

    /// A pending ticket requested by or about `user_id`, if any
    pub fn pending_for_user(&self, user_id: UserId) -> Option<TicketId> {
        self.pending
            .iter()
            .find(|slot| slot.key().0 == user_id || slot.subject_user == Some(user_id))
            .map(|slot| slot.ticket_id)
    }

    /// Pending ticket already filed by `requester` about `subject`
    pub fn pending_between(&self, requester: UserId, subject: Uuid) -> Option<TicketId> {
        self.pending
            .get(&(requester, subject))
            .map(|slot| slot.ticket_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NewUser;
    use crate::model::{EntityRef, Role, TicketStatus};
    use crate::store::NullJournal;

    struct Fixture {
        identity: Arc<IdentityStore>,
        registry: Arc<EntityRegistry>,
        engine: Arc<TicketEngine>,
        group: GroupId,
        admin: Principal,
        requester: Principal,
    }

    async fn fixture() -> Fixture {
        let journal: Arc<dyn Journal> = Arc::new(NullJournal);
        let identity = Arc::new(IdentityStore::new(journal.clone()));
        let registry = Arc::new(EntityRegistry::new(journal.clone()));
        let engine = Arc::new(TicketEngine::new(
            identity.clone(),
            registry.clone(),
            journal,
        ));

        let group = identity.create_group("payments", "").await.unwrap().id;
        let mk = |name: &str, role| NewUser {
            username: name.into(),
            name: name.into(),
            password_hash: String::new(),
            status: UserStatus::Active,
            memberships: vec![crate::model::Membership {
                group_id: group,
                role,
            }],
        };
        let admin = identity.create_user(mk("charlie", Role::Admin)).await.unwrap();
        let requester = identity.create_user(mk("alice", Role::Member)).await.unwrap();

        Fixture {
            admin: Principal::new(&admin, None),
            requester: Principal::new(&requester, None),
            identity,
            registry,
            engine,
            group,
        }
    }

    async fn claim(f: &Fixture) -> (Ticket, crate::model::EntityId) {
        let (entity, _) = f
            .registry
            .upsert_discovered(EntityRef::topic("orders"), vec![], false)
            .await
            .unwrap();
        let ticket = f
            .engine
            .create(
                "Claim topic orders for group payments".into(),
                TicketPayload::EntityClaim {
                    entity_id: entity.id,
                    group_id: f.group,
                    previous_owner: None,
                },
                f.requester.user_id,
                None,
            )
            .await
            .unwrap();
        (ticket, entity.id)
    }

    #[tokio::test]
    async fn test_duplicate_pending_claim() {
        let f = fixture().await;
        let (ticket, entity_id) = claim(&f).await;

        let err = f
            .engine
            .create(
                "again".into(),
                TicketPayload::EntityClaim {
                    entity_id,
                    group_id: f.group,
                    previous_owner: None,
                },
                f.requester.user_id,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::DuplicatePending(_)));
        assert_eq!(f.engine.pending_between(f.requester.user_id, entity_id), Some(ticket.id));
    }

    #[tokio::test]
    async fn test_approve_claim_sets_owner() {
        let f = fixture().await;
        let (ticket, entity_id) = claim(&f).await;

        let resolved = f
            .engine
            .resolve(ticket.id, Resolution::Approve, &f.admin, Some("ok".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, TicketStatus::Approved);
        assert_eq!(resolved.resolved_by, Some(f.admin.user_id));
        assert_eq!(f.registry.get(entity_id).await.unwrap().owner, Some(f.group));
        assert_eq!(f.engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_resolve_is_already_resolved() {
        let f = fixture().await;
        let (ticket, _) = claim(&f).await;

        f.engine
            .resolve(ticket.id, Resolution::Reject, &f.admin, None)
            .await
            .unwrap();
        let err = f
            .engine
            .resolve(ticket.id, Resolution::Approve, &f.admin, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::AlreadyResolved(id) if id == ticket.id));
    }

    #[tokio::test]
    async fn test_requester_cannot_resolve() {
        let f = fixture().await;
        let (ticket, _) = claim(&f).await;

        let err = f
            .engine
            .resolve(ticket.id, Resolution::Approve, &f.requester, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::Forbidden(_)));
        assert!(f.engine.get(ticket.id).await.unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_owner_changed_keeps_ticket_pending() {
        let f = fixture().await;
        let (ticket, entity_id) = claim(&f).await;
        let other = f.identity.create_group("orders", "").await.unwrap();
        f.registry.set_owner(entity_id, Some(other.id)).await.unwrap();

        let err = f
            .engine
            .resolve(ticket.id, Resolution::Approve, &f.admin, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::Conflict(_)));
        assert!(f.engine.get(ticket.id).await.unwrap().is_pending());
        assert_eq!(f.engine.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ticket() {
        let f = fixture().await;
        let err = f
            .engine
            .resolve(Uuid::new_v4(), Resolution::Approve, &f.admin, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_assigned_and_requested_lists() {
        let f = fixture().await;
        let (ticket, _) = claim(&f).await;

        let assigned = f
            .engine
            .list_assigned(&f.admin, false, PageRequest::default())
            .await;
        assert_eq!(assigned.items.len(), 1);
        assert_eq!(assigned.items[0].id, ticket.id);

        let own = f
            .engine
            .list_assigned(&f.requester, false, PageRequest::default())
            .await;
        assert!(own.items.is_empty());

        let mine = f
            .engine
            .list_requested(f.requester.user_id, PageRequest::default())
            .await;
        assert_eq!(mine.items.len(), 1);

        f.engine
            .resolve(ticket.id, Resolution::Approve, &f.admin, None)
            .await
            .unwrap();
        assert!(f
            .engine
            .list_assigned(&f.admin, false, PageRequest::default())
            .await
            .items
            .is_empty());
        assert_eq!(
            f.engine
                .list_assigned(&f.admin, true, PageRequest::default())
                .await
                .items
                .len(),
            1
        );
    }
}
