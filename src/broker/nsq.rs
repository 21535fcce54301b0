//! NSQ broker over the nsqlookupd / nsqd HTTP APIs

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Broker, BrokerChannel, BrokerOp, BrokerTopic, EntityStats};
use crate::model::EntityRef;
use crate::types::{GatekeeperError, Result};

#[derive(Debug, Deserialize)]
struct TopicsBody {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Producer {
    broadcast_address: String,
    http_port: u16,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    producers: Vec<Producer>,
}

#[derive(Debug, Deserialize)]
struct ChannelStats {
    channel_name: String,
    #[serde(default)]
    paused: bool,
    #[serde(default)]
    depth: u64,
    #[serde(default)]
    message_count: u64,
}

#[derive(Debug, Deserialize)]
struct TopicStats {
    topic_name: String,
    #[serde(default)]
    paused: bool,
    #[serde(default)]
    depth: u64,
    #[serde(default)]
    message_count: u64,
    #[serde(default)]
    channels: Vec<ChannelStats>,
}

#[derive(Debug, Deserialize)]
struct StatsBody {
    #[serde(default)]
    topics: Vec<TopicStats>,
}

/// Older nsq releases wrap every response as `{"status_code", "data": {..}}`
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("status_code") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

pub struct NsqBroker {
    lookupd_url: String,
    http_client: Client,
}

impl NsqBroker {
    pub fn new(lookupd_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatekeeperError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            lookupd_url: lookupd_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url, "Broker GET");
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatekeeperError::Dependency(format!(
                "{url} returned {status}"
            )));
        }
        let value: Value = response.json().await?;
        serde_json::from_value(unwrap_envelope(value))
            .map_err(|e| GatekeeperError::Dependency(format!("unexpected response from {url}: {e}")))
    }

    async fn post(&self, url: &str) -> Result<()> {
        debug!(url, "Broker POST");
        let response = self.http_client.post(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatekeeperError::Dependency(format!(
                "{url} returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn lookup(&self, topic: &str) -> Result<LookupBody> {
        let url = format!(
            "{}/lookup?topic={}",
            self.lookupd_url,
            urlencoding::encode(topic)
        );
        self.get_json(&url).await
    }

    /// nsqd HTTP addresses producing `topic`
    async fn hosts_of(&self, topic: &str) -> Result<Vec<String>> {
        let lookup = self.lookup(topic).await?;
        let hosts: BTreeSet<String> = lookup
            .producers
            .iter()
            .map(|p| format!("{}:{}", p.broadcast_address, p.http_port))
            .collect();
        Ok(hosts.into_iter().collect())
    }

    async fn topic_stats(&self, host: &str, topic: &str) -> Result<Option<TopicStats>> {
        let url = format!(
            "http://{}/stats?format=json&topic={}",
            host,
            urlencoding::encode(topic)
        );
        let stats: StatsBody = self.get_json(&url).await?;
        Ok(stats.topics.into_iter().find(|t| t.topic_name == topic))
    }

    fn command_url(base: &str, op: BrokerOp, entity: &EntityRef) -> String {
        match entity {
            EntityRef::Topic { topic } => format!(
                "{}/topic/{}?topic={}",
                base,
                op.endpoint(),
                urlencoding::encode(topic)
            ),
            EntityRef::Channel { topic, channel } => format!(
                "{}/channel/{}?topic={}&channel={}",
                base,
                op.endpoint(),
                urlencoding::encode(topic),
                urlencoding::encode(channel)
            ),
        }
    }

    /// Send `op` to every nsqd carrying the entity's topic
    async fn command(&self, op: BrokerOp, entity: &EntityRef) -> Result<()> {
        let hosts = self.hosts_of(entity.topic_name()).await?;
        if hosts.is_empty() {
            return Err(GatekeeperError::Dependency(format!(
                "no nsqd produces topic '{}'",
                entity.topic_name()
            )));
        }

        let results = join_all(hosts.iter().map(|host| async move {
            let url = Self::command_url(&format!("http://{host}"), op, entity);
            (host, self.post(&url).await)
        }))
        .await;

        let mut failures = Vec::new();
        for (host, result) in results {
            if let Err(e) = result {
                warn!(host = %host, entity = %entity, op = %op, "nsqd command failed: {}", e);
                failures.push(host.clone());
            }
        }

        // nsqd only deletes locally; lookupd keeps the registration otherwise
        if op == BrokerOp::Delete {
            let url = Self::command_url(&self.lookupd_url, op, entity);
            if let Err(e) = self.post(&url).await {
                warn!(entity = %entity, "nsqlookupd tombstone failed: {}", e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatekeeperError::Dependency(format!(
                "{op} {entity} failed on {}",
                failures.join(", ")
            )))
        }
    }
}

#[async_trait]
impl Broker for NsqBroker {
    async fn list_topics(&self) -> Result<Vec<BrokerTopic>> {
        let url = format!("{}/topics", self.lookupd_url);
        let body: TopicsBody = self.get_json(&url).await?;

        let mut topics = Vec::with_capacity(body.topics.len());
        for name in body.topics {
            let nsqd_hosts = self.hosts_of(&name).await?;
            topics.push(BrokerTopic { name, nsqd_hosts });
        }
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn list_channels(&self, topic: &str, hosts: &[String]) -> Result<Vec<BrokerChannel>> {
        let mut names: BTreeSet<String> = self.lookup(topic).await?.channels.into_iter().collect();
        for host in hosts {
            match self.topic_stats(host, topic).await {
                Ok(Some(stats)) => names.extend(stats.channels.into_iter().map(|c| c.channel_name)),
                Ok(None) => {}
                Err(e) => warn!(host = %host, topic, "nsqd stats unavailable: {}", e),
            }
        }
        Ok(names.into_iter().map(|name| BrokerChannel { name }).collect())
    }

    async fn pause(&self, entity: &EntityRef) -> Result<()> {
        self.command(BrokerOp::Pause, entity).await
    }

    async fn resume(&self, entity: &EntityRef) -> Result<()> {
        self.command(BrokerOp::Resume, entity).await
    }

    async fn empty(&self, entity: &EntityRef) -> Result<()> {
        self.command(BrokerOp::Empty, entity).await
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        self.command(BrokerOp::Delete, entity).await
    }

    /// Paused if any nsqd reports it paused
    async fn is_paused(&self, entity: &EntityRef) -> Result<bool> {
        let hosts = self.hosts_of(entity.topic_name()).await?;
        for host in &hosts {
            let Some(stats) = self.topic_stats(host, entity.topic_name()).await? else {
                continue;
            };
            let paused = match entity {
                EntityRef::Topic { .. } => stats.paused,
                EntityRef::Channel { channel, .. } => stats
                    .channels
                    .iter()
                    .any(|c| &c.channel_name == channel && c.paused),
            };
            if paused {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sums over all producers; any unreachable nsqd fails the whole read
    async fn stats(&self, entity: &EntityRef) -> Result<EntityStats> {
        let hosts = self.hosts_of(entity.topic_name()).await?;
        let reports = join_all(
            hosts
                .iter()
                .map(|host| self.topic_stats(host, entity.topic_name())),
        )
        .await;

        let mut total = EntityStats::default();
        for report in reports {
            let Some(topic) = report? else {
                continue;
            };
            match entity {
                EntityRef::Topic { .. } => total.add(topic.depth, topic.message_count),
                EntityRef::Channel { channel, .. } => {
                    if let Some(c) = topic.channels.iter().find(|c| &c.channel_name == channel) {
                        total.add(c.depth, c.message_count);
                    }
                }
            }
        }
        Ok(total)
    }

    fn name(&self) -> &'static str {
        "nsq"
    }
}
