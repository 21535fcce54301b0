//! Entity listing, bookmarks, claims and broker operations

use std::collections::HashSet;
use tracing::{info, warn};

use super::{non_blank, Gatekeeper};
use super::{BookmarkState, ClaimRequest, EntityDetail, EntityQuery, EntityView, TicketView};
use crate::authz::{can, Action, EntityAction, Principal, Resource};
use crate::broker::{BrokerOp, EntityStats};
use crate::model::{Entity, EntityId, EntityKind, EntityRef, TicketPayload};
use crate::registry::{EntityFilter, SyncReport};
use crate::types::{GatekeeperError, Result};

fn entity_action(op: BrokerOp) -> EntityAction {
    match op {
        BrokerOp::Pause => EntityAction::Pause,
        BrokerOp::Resume => EntityAction::Resume,
        BrokerOp::Empty => EntityAction::Empty,
        BrokerOp::Delete => EntityAction::Delete,
    }
}

/// `topic orders` or `channel orders/billing`
fn describe(entity: &Entity) -> String {
    match &entity.reference {
        EntityRef::Topic { topic } => format!("topic {topic}"),
        EntityRef::Channel { topic, channel } => format!("channel {topic}/{channel}"),
    }
}

fn can_manage(principal: &Principal, entity: &Entity) -> bool {
    can(
        Some(principal),
        Action::Mutate(EntityAction::Describe),
        Resource::Entity {
            owner: entity.owner,
        },
    )
    .is_allowed()
}

impl Gatekeeper {
    async fn render(
        &self,
        principal: &Principal,
        entities: &[Entity],
        bookmarks: &HashSet<EntityId>,
    ) -> Vec<EntityView> {
        let groups = self.group_map().await;
        entities
            .iter()
            .map(|e| {
                EntityView::build(
                    e,
                    &groups,
                    bookmarks.contains(&e.id),
                    can_manage(principal, e),
                )
            })
            .collect()
    }

    /// Entities visible to the caller. Bookmark flags belong to the caller.
    pub async fn list_entities(
        &self,
        principal: Option<&Principal>,
        query: EntityQuery,
    ) -> Result<Vec<EntityView>> {
        can(principal, Action::Read, Resource::Catalog).into_result()?;
        let principal = self.require(principal)?;

        let filter = EntityFilter {
            bookmarked_by: query.bookmarked.then_some(principal.user_id),
            kind: query.kind,
            topic: non_blank(query.topic),
            owner: query.owner,
            include_gone: false,
        };
        let entities = self.registry.list(&filter).await;
        let bookmarks = self.registry.bookmarks_of(principal.user_id).await;
        Ok(self.render(principal, &entities, &bookmarks).await)
    }

    pub async fn entity_detail(
        &self,
        principal: Option<&Principal>,
        id: EntityId,
    ) -> Result<EntityDetail> {
        can(principal, Action::Read, Resource::Catalog).into_result()?;
        let principal = self.require(principal)?;

        let entity = self.registry.get(id).await?;
        let channels = match entity.kind() {
            EntityKind::Topic => {
                self.registry
                    .list(&EntityFilter {
                        kind: Some(EntityKind::Channel),
                        topic: Some(entity.reference.topic_name().to_string()),
                        ..Default::default()
                    })
                    .await
            }
            EntityKind::Channel => Vec::new(),
        };

        let stats = self.live_stats(&entity).await;
        let bookmarks = self.registry.bookmarks_of(principal.user_id).await;
        let view = self.single_view(principal, entity, &bookmarks).await?;

        Ok(EntityDetail {
            entity: view,
            channels: self.render(principal, &channels, &bookmarks).await,
            pending_claim: self.tickets.pending_between(principal.user_id, id),
            stats,
        })
    }

    pub async fn toggle_bookmark(
        &self,
        principal: Option<&Principal>,
        id: EntityId,
    ) -> Result<BookmarkState> {
        let principal = self.require_active(principal)?;
        let entity = self.registry.get(id).await?;
        can(
            Some(principal),
            Action::Bookmark,
            Resource::Entity {
                owner: entity.owner,
            },
        )
        .into_result()?;

        let bookmarked = self.registry.toggle_bookmark(principal.user_id, id).await?;
        Ok(BookmarkState {
            entity_id: id,
            bookmarked,
        })
    }

    /// Ask for `request.group_id` to own an entity. Creates a pending ticket;
    /// ownership only moves when an assignee approves it.
    pub async fn claim_entity(
        &self,
        principal: Option<&Principal>,
        id: EntityId,
        request: ClaimRequest,
    ) -> Result<TicketView> {
        let principal = self.require_active(principal)?;

        // Lock order: group, then user
        let group = self.identity.hold_group(request.group_id).await?;
        let requester = self.identity.hold_user(principal.user_id).await?;

        let entity = self.registry.get(id).await?;
        if entity.gone {
            return Err(GatekeeperError::Conflict(format!(
                "{} is no longer reported by the broker",
                entity.reference
            )));
        }

        if let Err(e) = can(
            Some(principal),
            Action::Claim {
                target_group: group.id,
            },
            Resource::Entity {
                owner: entity.owner,
            },
        )
        .into_result()
        {
            warn!(
                entity = %entity.reference,
                user_id = %principal.user_id,
                group_id = %group.id,
                "Claim denied: {}", e
            );
            return Err(e);
        }

        let ticket = self
            .tickets
            .create(
                format!("Claim {} for group {}", describe(&entity), group.name),
                TicketPayload::EntityClaim {
                    entity_id: entity.id,
                    group_id: group.id,
                    previous_owner: entity.owner,
                },
                principal.user_id,
                non_blank(request.reason),
            )
            .await?;
        drop(requester);
        drop(group);

        info!(
            ticket_id = %ticket.id,
            entity = %entity.reference,
            group_id = %request.group_id,
            "Claim filed"
        );
        Ok(self.directory().await.ticket(&ticket))
    }

    pub async fn update_entity_description(
        &self,
        principal: Option<&Principal>,
        id: EntityId,
        text: &str,
    ) -> Result<EntityView> {
        let principal = self.require_active(principal)?;
        let entity = self.authorize_mutation(principal, id, EntityAction::Describe).await?;

        let updated = self.registry.update_description(entity.id, text).await?;
        let bookmarks = self.registry.bookmarks_of(principal.user_id).await;
        self.single_view(principal, updated, &bookmarks).await
    }

    /// Run a broker command, then mirror its result locally. A broker failure
    /// leaves the registry untouched.
    pub async fn entity_operation(
        &self,
        principal: Option<&Principal>,
        id: EntityId,
        op: BrokerOp,
    ) -> Result<EntityView> {
        let principal = self.require_active(principal)?;
        let entity = self.authorize_mutation(principal, id, entity_action(op)).await?;

        if let Err(e) = self.broker.apply(op, &entity.reference).await {
            tracing::error!(
                entity = %entity.reference,
                action = %op,
                broker = self.broker.name(),
                "Broker command failed: {}", e
            );
            return Err(e);
        }

        let updated = match op {
            BrokerOp::Pause => self.registry.reflect_paused(id, true).await?,
            BrokerOp::Resume => self.registry.reflect_paused(id, false).await?,
            BrokerOp::Empty => entity,
            BrokerOp::Delete => {
                let retired = self.registry.retire(id).await?;
                retired
                    .into_iter()
                    .find(|e| e.id == id)
                    .ok_or_else(|| GatekeeperError::NotFound(format!("entity {id}")))?
            }
        };

        info!(
            entity = %updated.reference,
            action = %op,
            user_id = %principal.user_id,
            "Entity operation applied"
        );
        let bookmarks = self.registry.bookmarks_of(principal.user_id).await;
        self.single_view(principal, updated, &bookmarks).await
    }

    /// Force a broker synchronisation pass
    pub async fn sync_entities(&self, principal: Option<&Principal>) -> Result<SyncReport> {
        can(principal, Action::SyncBroker, Resource::Broker).into_result()?;
        self.registry.sync_from_broker(self.broker.as_ref()).await
    }

    async fn authorize_mutation(
        &self,
        principal: &Principal,
        id: EntityId,
        action: EntityAction,
    ) -> Result<Entity> {
        let entity = self.registry.get(id).await?;
        if let Err(e) = can(
            Some(principal),
            Action::Mutate(action),
            Resource::Entity {
                owner: entity.owner,
            },
        )
        .into_result()
        {
            warn!(
                entity = %entity.reference,
                action = %action,
                user_id = %principal.user_id,
                "Entity mutation denied: {}", e
            );
            return Err(e);
        }
        Ok(entity)
    }

    /// Broker counters for the detail page; a broker failure only hides them
    async fn live_stats(&self, entity: &Entity) -> Option<EntityStats> {
        if entity.gone {
            return None;
        }
        match self.broker.stats(&entity.reference).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(
                    entity = %entity.reference,
                    broker = self.broker.name(),
                    "Broker stats unavailable: {}", e
                );
                None
            }
        }
    }

    async fn single_view(
        &self,
        principal: &Principal,
        entity: Entity,
        bookmarks: &HashSet<EntityId>,
    ) -> Result<EntityView> {
        self.render(principal, &[entity], bookmarks)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| GatekeeperError::Internal("entity view missing".into()))
    }
}
