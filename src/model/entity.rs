//! Topics and channels mirrored from the broker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::identity::GroupId;
use crate::types::GatekeeperError;

pub type EntityId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Topic,
    Channel,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Topic => write!(f, "topic"),
            EntityKind::Channel => write!(f, "channel"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(EntityKind::Topic),
            "channel" => Ok(EntityKind::Channel),
            other => Err(GatekeeperError::Validation(format!(
                "unknown entity kind '{other}'"
            ))),
        }
    }
}

/// Broker-side address of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityRef {
    Topic { topic: String },
    Channel { topic: String, channel: String },
}

impl EntityRef {
    pub fn topic(topic: &str) -> Self {
        EntityRef::Topic {
            topic: topic.to_string(),
        }
    }

    pub fn channel(topic: &str, channel: &str) -> Self {
        EntityRef::Channel {
            topic: topic.to_string(),
            channel: channel.to_string(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Topic { .. } => EntityKind::Topic,
            EntityRef::Channel { .. } => EntityKind::Channel,
        }
    }

    /// Topic the entity lives in (itself for topics)
    pub fn topic_name(&self) -> &str {
        match self {
            EntityRef::Topic { topic } | EntityRef::Channel { topic, .. } => topic,
        }
    }

    /// Display name: the topic name, or the channel name for channels
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Topic { topic } => topic,
            EntityRef::Channel { channel, .. } => channel,
        }
    }

    /// Unique key inside the broker namespace, e.g. `topic:orders`
    /// or `channel:orders/archiver`
    pub fn key(&self) -> String {
        match self {
            EntityRef::Topic { topic } => format!("topic:{topic}"),
            EntityRef::Channel { topic, channel } => format!("channel:{topic}/{channel}"),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub reference: EntityRef,
    /// Owning group; `None` while unclaimed
    pub owner: Option<GroupId>,
    pub description: String,
    /// Mirrored from the broker
    pub paused: bool,
    /// nsqd HTTP addresses currently hosting the topic
    pub nsqd_hosts: Vec<String>,
    /// No longer reported by the broker
    pub gone: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(reference: EntityRef, nsqd_hosts: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference,
            owner: None,
            description: String::new(),
            paused: false,
            nsqd_hosts,
            gone: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.reference.kind()
    }

    pub fn name(&self) -> &str {
        self.reference.name()
    }

    pub fn is_claimed(&self) -> bool {
        self.owner.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_keys() {
        assert_eq!(EntityRef::topic("orders").key(), "topic:orders");
        assert_eq!(
            EntityRef::channel("orders", "archiver").key(),
            "channel:orders/archiver"
        );
    }

    #[test]
    fn test_entity_ref_names() {
        let channel = EntityRef::channel("orders", "archiver");
        assert_eq!(channel.name(), "archiver");
        assert_eq!(channel.topic_name(), "orders");
        assert_eq!(channel.kind(), EntityKind::Channel);
    }

    #[test]
    fn test_new_entity_is_unclaimed() {
        let entity = Entity::new(EntityRef::topic("payments"), vec![]);
        assert!(!entity.is_claimed());
        assert!(!entity.paused);
        assert!(!entity.gone);
    }
}
