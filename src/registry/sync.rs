//! Broker to registry mirroring

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{EntityFilter, EntityRegistry};
use crate::broker::Broker;
use crate::model::{EntityId, EntityRef};
use crate::types::Result;

/// Outcome of one synchronisation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub topics: usize,
    pub channels: usize,
    pub discovered: usize,
    pub retired: usize,
}

impl EntityRegistry {
    /// Mirror every topic and channel the broker reports. Ownership,
    /// descriptions and bookmarks are kept; entities the broker no longer
    /// reports are marked gone.
    pub async fn sync_from_broker(&self, broker: &dyn Broker) -> Result<SyncReport> {
        let _pass = self.sync_lock.lock().await;
        let mut report = SyncReport::default();
        let mut seen: HashSet<EntityId> = HashSet::new();

        for topic in broker.list_topics().await? {
            let topic_ref = EntityRef::topic(&topic.name);
            let paused = broker.is_paused(&topic_ref).await?;
            let (entity, is_new) = self
                .upsert_discovered(topic_ref, topic.nsqd_hosts.clone(), paused)
                .await?;
            seen.insert(entity.id);
            report.topics += 1;
            if is_new {
                report.discovered += 1;
            }

            for channel in broker.list_channels(&topic.name, &topic.nsqd_hosts).await? {
                let channel_ref = EntityRef::channel(&topic.name, &channel.name);
                let paused = broker.is_paused(&channel_ref).await?;
                let (entity, is_new) = self
                    .upsert_discovered(channel_ref, topic.nsqd_hosts.clone(), paused)
                    .await?;
                seen.insert(entity.id);
                report.channels += 1;
                if is_new {
                    report.discovered += 1;
                }
            }
        }

        let stale: Vec<EntityId> = self
            .list(&EntityFilter::default())
            .await
            .into_iter()
            .filter(|e| !seen.contains(&e.id))
            .map(|e| e.id)
            .collect();
        for id in stale {
            let entity = self
                .modify(id, |e| {
                    e.gone = true;
                    e.paused = false;
                })
                .await?;
            debug!(entity = %entity.reference, "Entity no longer reported by broker");
            report.retired += 1;
        }

        info!(
            topics = report.topics,
            channels = report.channels,
            discovered = report.discovered,
            retired = report.retired,
            "Broker sync complete"
        );
        Ok(report)
    }
}

/// Run `sync_from_broker` every `interval` until the task is aborted
pub fn spawn_sync_task(
    registry: Arc<EntityRegistry>,
    broker: Arc<dyn Broker>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = registry.sync_from_broker(broker.as_ref()).await {
                warn!(broker = broker.name(), "Broker sync failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::store::NullJournal;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sync_discovers_and_retires() {
        let registry = EntityRegistry::new(Arc::new(NullJournal));
        let broker = MemoryBroker::new();
        broker.add_channel("orders", "archiver");
        broker.add_topic("payments");

        let report = registry.sync_from_broker(&broker).await.unwrap();
        assert_eq!(report.topics, 2);
        assert_eq!(report.channels, 1);
        assert_eq!(report.discovered, 3);

        let payments = registry.find(&EntityRef::topic("payments")).await.unwrap();
        let team = Uuid::new_v4();
        registry.set_owner(payments.id, Some(team)).await.unwrap();

        broker.delete(&EntityRef::topic("payments")).await.unwrap();
        let report = registry.sync_from_broker(&broker).await.unwrap();
        assert_eq!(report.discovered, 0);
        assert_eq!(report.retired, 1);
        assert_eq!(registry.list(&EntityFilter::default()).await.len(), 2);

        // re-created topics come back with their owner
        broker.add_topic("payments");
        registry.sync_from_broker(&broker).await.unwrap();
        let payments = registry.find(&EntityRef::topic("payments")).await.unwrap();
        assert!(!payments.gone);
        assert_eq!(payments.owner, Some(team));
    }

    #[tokio::test]
    async fn test_sync_mirrors_pause_state() {
        let registry = EntityRegistry::new(Arc::new(NullJournal));
        let broker = MemoryBroker::new();
        broker.add_topic("orders");
        broker.pause(&EntityRef::topic("orders")).await.unwrap();

        registry.sync_from_broker(&broker).await.unwrap();
        let orders = registry.find(&EntityRef::topic("orders")).await.unwrap();
        assert!(orders.paused);
    }

    #[tokio::test]
    async fn test_sync_failure_leaves_registry_alone() {
        let registry = EntityRegistry::new(Arc::new(NullJournal));
        let broker = MemoryBroker::new();
        broker.add_topic("orders");
        registry.sync_from_broker(&broker).await.unwrap();

        broker.set_unavailable(true);
        assert!(registry.sync_from_broker(&broker).await.is_err());
        assert_eq!(registry.list(&EntityFilter::default()).await.len(), 1);
    }
}
