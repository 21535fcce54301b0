//! Messaging broker collaborator
//!
//! The broker is the source of truth for which topics and channels exist and
//! whether they are paused. `NsqBroker` talks to nsqlookupd/nsqd over HTTP;
//! `MemoryBroker` stands in for it in dev mode and tests.

pub mod memory;
pub mod nsq;

pub use memory::MemoryBroker;
pub use nsq::NsqBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::EntityRef;
use crate::types::Result;

/// A topic as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerTopic {
    pub name: String,
    /// nsqd HTTP addresses (`host:port`) carrying the topic
    pub nsqd_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerChannel {
    pub name: String,
}

/// Queue counters summed over every nsqd carrying the entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    /// Messages waiting to be delivered
    pub depth: u64,
    /// Messages received since nsqd started
    pub messages: u64,
}

impl EntityStats {
    fn add(&mut self, depth: u64, messages: u64) {
        self.depth += depth;
        self.messages += messages;
    }
}

/// Operational commands accepted by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOp {
    Pause,
    Resume,
    Empty,
    Delete,
}

impl BrokerOp {
    /// Path segment of the nsqd HTTP endpoint
    pub fn endpoint(&self) -> &'static str {
        match self {
            BrokerOp::Pause => "pause",
            BrokerOp::Resume => "unpause",
            BrokerOp::Empty => "empty",
            BrokerOp::Delete => "delete",
        }
    }
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerOp::Pause => write!(f, "pause"),
            BrokerOp::Resume => write!(f, "resume"),
            BrokerOp::Empty => write!(f, "empty"),
            BrokerOp::Delete => write!(f, "delete"),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<BrokerTopic>>;

    async fn list_channels(&self, topic: &str, hosts: &[String]) -> Result<Vec<BrokerChannel>>;

    async fn pause(&self, entity: &EntityRef) -> Result<()>;

    async fn resume(&self, entity: &EntityRef) -> Result<()>;

    async fn empty(&self, entity: &EntityRef) -> Result<()>;

    async fn delete(&self, entity: &EntityRef) -> Result<()>;

    async fn is_paused(&self, entity: &EntityRef) -> Result<bool>;

    async fn stats(&self, entity: &EntityRef) -> Result<EntityStats>;

    /// Dispatch one of the operational commands
    async fn apply(&self, op: BrokerOp, entity: &EntityRef) -> Result<()> {
        match op {
            BrokerOp::Pause => self.pause(entity).await,
            BrokerOp::Resume => self.resume(entity).await,
            BrokerOp::Empty => self.empty(entity).await,
            BrokerOp::Delete => self.delete(entity).await,
        }
    }

    fn name(&self) -> &'static str;
}
