//! In-process broker

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Broker, BrokerChannel, BrokerTopic, EntityStats};
use crate::model::EntityRef;
use crate::types::{GatekeeperError, Result};

const MEMORY_HOST: &str = "memory:4151";

#[derive(Debug, Clone, Default)]
struct MemoryChannel {
    paused: bool,
    depth: u64,
    messages: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryTopic {
    paused: bool,
    depth: u64,
    messages: u64,
    channels: BTreeMap<String, MemoryChannel>,
}

/// Broker kept entirely in memory. `set_unavailable(true)` makes every call
/// fail with a dependency error.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: DashMap<String, MemoryTopic>,
    unavailable: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_topic(&self, topic: &str) {
        self.topics.entry(topic.to_string()).or_default();
    }

    pub fn add_channel(&self, topic: &str, channel: &str) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .channels
            .entry(channel.to_string())
            .or_default();
    }

    /// Pretend `count` messages were published to the topic and its channels
    pub fn publish(&self, topic: &str, count: u64) {
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        entry.depth += count;
        entry.messages += count;
        for channel in entry.channels.values_mut() {
            channel.depth += count;
            channel.messages += count;
        }
    }

    pub fn depth(&self, entity: &EntityRef) -> Option<u64> {
        let topic = self.topics.get(entity.topic_name())?;
        match entity {
            EntityRef::Topic { .. } => Some(topic.depth),
            EntityRef::Channel { channel, .. } => topic.channels.get(channel).map(|c| c.depth),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatekeeperError::Dependency("broker unavailable".into()));
        }
        Ok(())
    }

    fn with_entity<R>(
        &self,
        entity: &EntityRef,
        f: impl FnOnce(&mut MemoryTopic, Option<&str>) -> R,
    ) -> Result<R> {
        self.check()?;
        let mut topic = self
            .topics
            .get_mut(entity.topic_name())
            .ok_or_else(|| GatekeeperError::Dependency(format!("{entity} not known to broker")))?;
        match entity {
            EntityRef::Topic { .. } => Ok(f(&mut topic, None)),
            EntityRef::Channel { channel, .. } => {
                if !topic.channels.contains_key(channel) {
                    return Err(GatekeeperError::Dependency(format!(
                        "{entity} not known to broker"
                    )));
                }
                Ok(f(&mut topic, Some(channel.as_str())))
            }
        }
    }

    fn set_paused(&self, entity: &EntityRef, paused: bool) -> Result<()> {
        self.with_entity(entity, |topic, channel| match channel {
            None => topic.paused = paused,
            Some(name) => {
                if let Some(c) = topic.channels.get_mut(name) {
                    c.paused = paused;
                }
            }
        })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<BrokerTopic>> {
        self.check()?;
        let mut topics: Vec<BrokerTopic> = self
            .topics
            .iter()
            .map(|t| BrokerTopic {
                name: t.key().clone(),
                nsqd_hosts: vec![MEMORY_HOST.to_string()],
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn list_channels(&self, topic: &str, _hosts: &[String]) -> Result<Vec<BrokerChannel>> {
        self.check()?;
        Ok(self
            .topics
            .get(topic)
            .map(|t| {
                t.channels
                    .keys()
                    .map(|name| BrokerChannel { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn pause(&self, entity: &EntityRef) -> Result<()> {
        self.set_paused(entity, true)
    }

    async fn resume(&self, entity: &EntityRef) -> Result<()> {
        self.set_paused(entity, false)
    }

    async fn empty(&self, entity: &EntityRef) -> Result<()> {
        self.with_entity(entity, |topic, channel| match channel {
            None => topic.depth = 0,
            Some(name) => {
                if let Some(c) = topic.channels.get_mut(name) {
                    c.depth = 0;
                }
            }
        })
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        self.with_entity(entity, |_, _| ())?;
        match entity {
            EntityRef::Topic { topic } => {
                self.topics.remove(topic);
            }
            EntityRef::Channel { topic, channel } => {
                if let Some(mut t) = self.topics.get_mut(topic) {
                    t.channels.remove(channel);
                }
            }
        }
        Ok(())
    }

    async fn is_paused(&self, entity: &EntityRef) -> Result<bool> {
        self.with_entity(entity, |topic, channel| match channel {
            None => topic.paused,
            Some(name) => topic.channels.get(name).map(|c| c.paused).unwrap_or(false),
        })
    }

    async fn stats(&self, entity: &EntityRef) -> Result<EntityStats> {
        self.with_entity(entity, |topic, channel| match channel {
            None => EntityStats {
                depth: topic.depth,
                messages: topic.messages,
            },
            Some(name) => topic
                .channels
                .get(name)
                .map(|c| EntityStats {
                    depth: c.depth,
                    messages: c.messages,
                })
                .unwrap_or_default(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
