//! Entity document schema
//!
//! Topics and channels share one collection, keyed by `topic:<t>` or
//! `channel:<t>/<c>`.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::{parse_field, parse_id};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Entity, EntityKind, EntityRef};
use crate::types::GatekeeperError;

pub const ENTITY_COLLECTION: &str = "entities";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EntityDoc {
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Unique broker key
    pub key: String,

    /// topic or channel
    pub kind: String,

    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Owning group id, absent while unclaimed
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub nsqd_hosts: Vec<String>,

    #[serde(default)]
    pub gone: bool,
}

impl From<&Entity> for EntityDoc {
    fn from(entity: &Entity) -> Self {
        Self {
            _id: entity.id.to_string(),
            metadata: Metadata::at(entity.created_at, entity.updated_at),
            key: entity.reference.key(),
            kind: entity.kind().to_string(),
            topic: entity.reference.topic_name().to_string(),
            channel: match &entity.reference {
                EntityRef::Topic { .. } => None,
                EntityRef::Channel { channel, .. } => Some(channel.clone()),
            },
            owner: entity.owner.map(|g| g.to_string()),
            description: entity.description.clone(),
            paused: entity.paused,
            nsqd_hosts: entity.nsqd_hosts.clone(),
            gone: entity.gone,
        }
    }
}

impl TryFrom<EntityDoc> for Entity {
    type Error = GatekeeperError;

    fn try_from(doc: EntityDoc) -> Result<Self, Self::Error> {
        let kind: EntityKind = parse_field(&doc.kind, "entity kind")?;
        let reference = match (kind, doc.channel.as_deref()) {
            (EntityKind::Topic, _) => EntityRef::topic(&doc.topic),
            (EntityKind::Channel, Some(channel)) => EntityRef::channel(&doc.topic, channel),
            (EntityKind::Channel, None) => {
                return Err(GatekeeperError::Database(format!(
                    "channel document {} has no channel name",
                    doc._id
                )))
            }
        };

        Ok(Entity {
            id: parse_id(&doc._id, "entity")?,
            reference,
            owner: doc
                .owner
                .as_deref()
                .map(|g| parse_id(g, "group"))
                .transpose()?,
            description: doc.description,
            paused: doc.paused,
            nsqd_hosts: doc.nsqd_hosts,
            gone: doc.gone,
            created_at: doc.metadata.created(),
            updated_at: doc.metadata.updated(),
        })
    }
}

impl IntoIndexes for EntityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("key_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "owner": 1 },
                Some(IndexOptions::builder().name("owner_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for EntityDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_channel_doc_conversion() {
        let mut entity = Entity::new(EntityRef::channel("orders", "billing"), vec!["nsqd:4151".into()]);
        entity.owner = Some(Uuid::new_v4());

        let doc = EntityDoc::from(&entity);
        assert_eq!(doc.key, "channel:orders/billing");
        assert_eq!(doc.channel.as_deref(), Some("billing"));

        let back = Entity::try_from(doc).unwrap();
        assert_eq!(back.reference, entity.reference);
        assert_eq!(back.owner, entity.owner);
    }

    #[test]
    fn test_channel_without_name_is_corrupt() {
        let entity = Entity::new(EntityRef::channel("orders", "billing"), Vec::new());
        let mut doc = EntityDoc::from(&entity);
        doc.channel = None;
        assert!(Entity::try_from(doc).is_err());
    }
}
