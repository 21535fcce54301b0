//! Entity Registry
//!
//! Local mirror of broker topics and channels. The broker decides what
//! exists and what is paused; the registry owns group ownership, descriptions
//! and per-user bookmarks.

mod sync;

pub use sync::{spawn_sync_task, SyncReport};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard};
use tracing::info;

use crate::model::{Entity, EntityId, EntityKind, EntityRef, GroupId, UserId};
use crate::store::{Change, Journal, RecordTable};
use crate::types::{GatekeeperError, Result};

const MAX_DESCRIPTION_LEN: usize = 4096;

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Only entities this user bookmarked
    pub bookmarked_by: Option<UserId>,
    pub kind: Option<EntityKind>,
    /// Only this topic and its channels
    pub topic: Option<String>,
    pub owner: Option<GroupId>,
    /// Also return entities the broker no longer reports
    pub include_gone: bool,
}

pub struct EntityRegistry {
    entities: RecordTable<EntityId, Entity>,
    keys: DashMap<String, EntityId>,
    bookmarks: RecordTable<UserId, HashSet<EntityId>>,
    journal: Arc<dyn Journal>,
    /// One broker sync pass at a time
    sync_lock: Mutex<()>,
}

impl EntityRegistry {
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            entities: RecordTable::new(),
            keys: DashMap::new(),
            bookmarks: RecordTable::new(),
            journal,
            sync_lock: Mutex::new(()),
        }
    }

    /// Load persisted rows. Only called before the registry is shared.
    pub fn hydrate(&self, entities: Vec<Entity>, bookmarks: Vec<(UserId, EntityId)>) {
        for entity in entities {
            self.keys.insert(entity.reference.key(), entity.id);
            self.entities.put(entity.id, entity);
        }
        let mut per_user: std::collections::HashMap<UserId, HashSet<EntityId>> =
            std::collections::HashMap::new();
        for (user_id, entity_id) in bookmarks {
            per_user.entry(user_id).or_default().insert(entity_id);
        }
        for (user_id, set) in per_user {
            self.bookmarks.put(user_id, set);
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities matching `filter`, ordered by key (topics before their channels)
    pub async fn list(&self, filter: &EntityFilter) -> Vec<Entity> {
        let bookmarked = match filter.bookmarked_by {
            Some(user_id) => Some(self.bookmarks_of(user_id).await),
            None => None,
        };

        let mut out: Vec<Entity> = self
            .entities
            .values()
            .await
            .into_iter()
            .filter(|e| filter.include_gone || !e.gone)
            .filter(|e| filter.kind.map_or(true, |k| e.kind() == k))
            .filter(|e| {
                filter
                    .topic
                    .as_deref()
                    .map_or(true, |t| e.reference.topic_name() == t)
            })
            .filter(|e| filter.owner.map_or(true, |g| e.owner == Some(g)))
            .filter(|e| bookmarked.as_ref().map_or(true, |set| set.contains(&e.id)))
            .collect();
        out.sort_by(|a, b| {
            (a.reference.topic_name(), a.kind() == EntityKind::Channel, a.name()).cmp(&(
                b.reference.topic_name(),
                b.kind() == EntityKind::Channel,
                b.name(),
            ))
        });
        out
    }

    pub async fn get(&self, id: EntityId) -> Result<Entity> {
        self.entities
            .get(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("entity {id}")))
    }

    pub async fn find(&self, reference: &EntityRef) -> Option<Entity> {
        let id = self.keys.get(&reference.key()).map(|id| *id)?;
        self.entities.get(&id).await
    }

    /// Exclusive lock on one entity row
    pub async fn lock(&self, id: EntityId) -> Result<OwnedRwLockWriteGuard<Entity>> {
        self.entities
            .write(&id)
            .await
            .ok_or_else(|| GatekeeperError::NotFound(format!("entity {id}")))
    }

    /// Number of entities (gone or not) owned by `group_id`
    pub async fn owned_by(&self, group_id: GroupId) -> usize {
        self.entities
            .values()
            .await
            .iter()
            .filter(|e| e.owner == Some(group_id))
            .count()
    }

    /// Apply `mutate` to a copy of the row, journal it, then commit
    async fn modify<F>(&self, id: EntityId, mutate: F) -> Result<Entity>
    where
        F: FnOnce(&mut Entity),
    {
        let mut row = self.lock(id).await?;
        let mut next = row.clone();
        mutate(&mut next);
        next.touch();

        self.journal.record(&Change::PutEntity(next.clone())).await?;
        *row = next.clone();
        Ok(next)
    }

    /// Set or clear the owning group without a ticket
    #[cfg(test)]
    pub(crate) async fn set_owner(&self, id: EntityId, owner: Option<GroupId>) -> Result<Entity> {
        let entity = self.modify(id, |e| e.owner = owner).await?;
        info!(entity = %entity.reference, owner = ?owner, "Entity owner set");
        Ok(entity)
    }

    pub async fn update_description(&self, id: EntityId, text: &str) -> Result<Entity> {
        let text = text.trim();
        if text.len() > MAX_DESCRIPTION_LEN {
            return Err(GatekeeperError::Validation(format!(
                "Description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        let entity = self
            .modify(id, |e| e.description = text.to_string())
            .await?;
        info!(entity = %entity.reference, "Entity description updated");
        Ok(entity)
    }

    /// Mirror the paused flag reported by the broker
    pub async fn reflect_paused(&self, id: EntityId, paused: bool) -> Result<Entity> {
        let current = self.get(id).await?;
        if current.paused == paused {
            return Ok(current);
        }
        let entity = self.modify(id, |e| e.paused = paused).await?;
        info!(entity = %entity.reference, paused, "Entity pause state mirrored");
        Ok(entity)
    }

    /// Mark an entity (and, for a topic, its channels) as removed from the
    /// broker. Rows stay so tickets and ownership survive a re-creation.
    pub async fn retire(&self, id: EntityId) -> Result<Vec<Entity>> {
        let entity = self.get(id).await?;
        let mut targets = vec![id];
        if entity.kind() == EntityKind::Topic {
            let channels = self
                .list(&EntityFilter {
                    kind: Some(EntityKind::Channel),
                    topic: Some(entity.reference.topic_name().to_string()),
                    include_gone: true,
                    ..Default::default()
                })
                .await;
            targets.extend(channels.into_iter().map(|c| c.id));
        }

        let mut retired = Vec::with_capacity(targets.len());
        for target in targets {
            let entity = self
                .modify(target, |e| {
                    e.gone = true;
                    e.paused = false;
                })
                .await?;
            info!(entity = %entity.reference, "Entity retired");
            retired.push(entity);
        }
        Ok(retired)
    }

    /// Insert a newly discovered entity, or refresh the broker-owned fields of
    /// a known one. Returns the row and whether it was new.
    pub async fn upsert_discovered(
        &self,
        reference: EntityRef,
        nsqd_hosts: Vec<String>,
        paused: bool,
    ) -> Result<(Entity, bool)> {
        let key = reference.key();
        let candidate = Entity {
            paused,
            ..Entity::new(reference, nsqd_hosts.clone())
        };

        let (id, is_new) = match self.keys.entry(key.clone()) {
            Entry::Occupied(slot) => (*slot.get(), false),
            Entry::Vacant(slot) => {
                slot.insert(candidate.id);
                (candidate.id, true)
            }
        };

        if is_new {
            if let Err(e) = self
                .journal
                .record(&Change::PutEntity(candidate.clone()))
                .await
            {
                self.keys.remove(&key);
                return Err(e);
            }
            self.entities.insert_new(id, candidate.clone());
            info!(entity = %candidate.reference, "Entity discovered");
            return Ok((candidate, true));
        }

        let current = self.get(id).await?;
        if !current.gone && current.paused == paused && current.nsqd_hosts == nsqd_hosts {
            return Ok((current, false));
        }
        let entity = self
            .modify(id, |e| {
                e.gone = false;
                e.paused = paused;
                e.nsqd_hosts = nsqd_hosts;
            })
            .await?;
        Ok((entity, false))
    }

    // =========================================================================
    // Bookmarks
    // =========================================================================

    pub async fn bookmarks_of(&self, user_id: UserId) -> HashSet<EntityId> {
        self.bookmarks.get(&user_id).await.unwrap_or_default()
    }

    pub async fn is_bookmarked(&self, user_id: UserId, entity_id: EntityId) -> bool {
        match self.bookmarks.read(&user_id).await {
            Some(set) => set.contains(&entity_id),
            None => false,
        }
    }

    /// Flip the bookmark of `user_id` on `entity_id`. Returns the new state.
    pub async fn toggle_bookmark(&self, user_id: UserId, entity_id: EntityId) -> Result<bool> {
        if !self.entities.contains(&entity_id) {
            return Err(GatekeeperError::NotFound(format!("entity {entity_id}")));
        }

        let record = self.bookmarks.get_or_insert_with(user_id, HashSet::new);
        let mut set = record.write().await;
        let on = !set.contains(&entity_id);

        self.journal
            .record(&Change::Bookmark {
                user_id,
                entity_id,
                on,
            })
            .await?;
        if on {
            set.insert(entity_id);
        } else {
            set.remove(&entity_id);
        }

        info!(user_id = %user_id, entity_id = %entity_id, bookmarked = on, "Bookmark toggled");
        Ok(on)
    }

    /// Drop every bookmark of a deleted user
    pub fn forget_user(&self, user_id: UserId) {
        self.bookmarks.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NullJournal;
    use uuid::Uuid;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(Arc::new(NullJournal))
    }

    #[tokio::test]
    async fn test_upsert_keeps_ownership_and_description() {
        let registry = registry();
        let (entity, is_new) = registry
            .upsert_discovered(EntityRef::topic("orders"), vec!["nsqd-1:4151".into()], false)
            .await
            .unwrap();
        assert!(is_new);

        let group = Uuid::new_v4();
        registry.set_owner(entity.id, Some(group)).await.unwrap();
        registry.update_description(entity.id, "order events").await.unwrap();

        let (again, is_new) = registry
            .upsert_discovered(EntityRef::topic("orders"), vec!["nsqd-2:4151".into()], true)
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.id, entity.id);
        assert_eq!(again.owner, Some(group));
        assert_eq!(again.description, "order events");
        assert!(again.paused);
        assert_eq!(again.nsqd_hosts, vec!["nsqd-2:4151".to_string()]);
    }

    #[tokio::test]
    async fn test_bookmarks_are_per_user() {
        let registry = registry();
        let (entity, _) = registry
            .upsert_discovered(EntityRef::topic("orders"), vec![], false)
            .await
            .unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(registry.toggle_bookmark(alice, entity.id).await.unwrap());
        assert!(registry.is_bookmarked(alice, entity.id).await);
        assert!(!registry.is_bookmarked(bob, entity.id).await);

        let filter = EntityFilter {
            bookmarked_by: Some(bob),
            ..Default::default()
        };
        assert!(registry.list(&filter).await.is_empty());

        assert!(!registry.toggle_bookmark(alice, entity.id).await.unwrap());
        assert!(!registry.is_bookmarked(alice, entity.id).await);
    }

    #[tokio::test]
    async fn test_bookmark_unknown_entity() {
        let registry = registry();
        let err = registry
            .toggle_bookmark(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_retire_topic_hides_channels() {
        let registry = registry();
        let (topic, _) = registry
            .upsert_discovered(EntityRef::topic("orders"), vec![], false)
            .await
            .unwrap();
        registry
            .upsert_discovered(EntityRef::channel("orders", "archiver"), vec![], false)
            .await
            .unwrap();
        registry
            .upsert_discovered(EntityRef::topic("payments"), vec![], false)
            .await
            .unwrap();

        let retired = registry.retire(topic.id).await.unwrap();
        assert_eq!(retired.len(), 2);

        let visible = registry.list(&EntityFilter::default()).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name(), "payments");
    }

    #[tokio::test]
    async fn test_list_orders_topics_before_channels() {
        let registry = registry();
        registry
            .upsert_discovered(EntityRef::channel("a", "z"), vec![], false)
            .await
            .unwrap();
        registry
            .upsert_discovered(EntityRef::topic("b"), vec![], false)
            .await
            .unwrap();
        registry
            .upsert_discovered(EntityRef::topic("a"), vec![], false)
            .await
            .unwrap();

        let keys: Vec<String> = registry
            .list(&EntityFilter::default())
            .await
            .iter()
            .map(|e| e.reference.key())
            .collect();
        assert_eq!(keys, vec!["topic:a", "channel:a/z", "topic:b"]);
    }
}
