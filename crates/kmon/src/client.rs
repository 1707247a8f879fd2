//! Kafka client construction and the admin facade.
//!
//! The admin surface the topic manager needs is small, so it sits behind
//! the [`BrokerAdmin`] trait; reconciliation logic is tested against an
//! in-memory implementation while production wires in [`KafkaAdmin`].

use crate::config::KafkaConfig;
use crate::error::{KmonError, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::metadata::Metadata;
use rdkafka::producer::FutureProducer;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// One cluster metadata observation: live brokers plus per-topic
/// partition, replica and error details.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub broker_ids: Vec<i32>,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    pub error: Option<RDKafkaErrorCode>,
}

impl TopicMetadata {
    /// Brokers report deleted topics as unknown for a while; both shapes
    /// mean "absent" to the reconciler.
    pub fn is_unknown(&self) -> bool {
        matches!(self.error, Some(RDKafkaErrorCode::UnknownTopicOrPartition))
    }
}

#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    pub id: i32,
    pub replicas: Vec<i32>,
}

/// Desired monitoring topic layout: partition `i` is replicated on exactly
/// `replica_assignment[i]`.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub replica_assignment: Vec<Vec<i32>>,
    pub configs: Vec<(String, String)>,
}

/// Admin operations the topic manager depends on.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Fetch cluster metadata, optionally scoped to one topic.
    async fn cluster_metadata(&self, topic: Option<&str>) -> Result<ClusterMetadata>;

    /// Create a topic with an explicit replica assignment. A topic that
    /// already exists counts as success.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<()>;

    /// Delete a topic. An unknown topic counts as success.
    async fn delete_topic(&self, name: &str) -> Result<()>;
}

/// rdkafka-backed [`BrokerAdmin`].
pub struct KafkaAdmin {
    client: AdminClient<DefaultClientContext>,
}

impl KafkaAdmin {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let client = base_config(config).create()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrokerAdmin for KafkaAdmin {
    async fn cluster_metadata(&self, topic: Option<&str>) -> Result<ClusterMetadata> {
        let metadata = self.client.inner().fetch_metadata(topic, METADATA_TIMEOUT)?;
        Ok(convert_metadata(&metadata))
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<()> {
        let assignment: Vec<&[i32]> = spec
            .replica_assignment
            .iter()
            .map(|replicas| replicas.as_slice())
            .collect();
        let mut topic = NewTopic::new(
            &spec.name,
            spec.replica_assignment.len() as i32,
            TopicReplication::Variable(&assignment),
        );
        for (key, value) in &spec.configs {
            topic = topic.set(key, value);
        }

        let results = self
            .client
            .create_topics(&[topic], &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    tracing::warn!("Failed to create topic '{}': {}", name, code);
                    return Err(KmonError::Kafka(KafkaError::AdminOp(code)));
                }
            }
        }
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let results = self
            .client
            .delete_topics(&[name], &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((_, RDKafkaErrorCode::UnknownTopicOrPartition)) => {}
                Err((name, code)) => {
                    tracing::warn!("Failed to delete topic '{}': {}", name, code);
                    return Err(KmonError::Kafka(KafkaError::AdminOp(code)));
                }
            }
        }
        Ok(())
    }
}

fn convert_metadata(metadata: &Metadata) -> ClusterMetadata {
    ClusterMetadata {
        broker_ids: metadata.brokers().iter().map(|b| b.id()).collect(),
        topics: metadata
            .topics()
            .iter()
            .map(|topic| TopicMetadata {
                name: topic.name().to_string(),
                partitions: topic
                    .partitions()
                    .iter()
                    .map(|partition| PartitionMetadata {
                        id: partition.id(),
                        replicas: partition.replicas().to_vec(),
                    })
                    .collect(),
                error: topic.error().map(RDKafkaErrorCode::from),
            })
            .collect(),
    }
}

fn base_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.seed_brokers.join(","))
        .set("socket.keepalive.enable", "true");
    client_config
}

/// Producer for probe records. Probes measure per-record latency, so
/// batching stays off and every send waits for a full ack.
pub fn future_producer(config: &KafkaConfig) -> Result<FutureProducer> {
    let producer = base_config(config)
        .set("acks", "all")
        .set("linger.ms", "0")
        .set("message.timeout.ms", "30000")
        .create()?;
    Ok(producer)
}

/// Consumer for reading probes back. Partitions are assigned manually, so
/// the group id exists only to namespace this instance.
pub fn stream_consumer(config: &KafkaConfig, instance_uuid: &str) -> Result<StreamConsumer> {
    let consumer = base_config(config)
        .set("group.id", format!("kmon-{instance_uuid}"))
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .set("allow.auto.create.topics", "false")
        .set("fetch.wait.max.ms", "100")
        .create()?;
    Ok(consumer)
}
