//! Monitoring topic reconciliation.
//!
//! The topic manager keeps the monitoring topic aligned with the broker
//! fleet: one partition per broker, each pinned to a distinct broker by a
//! single-replica assignment, so probe traffic exercises every broker
//! individually. Any drift (broker set change, partition count mismatch,
//! or an unfinished previous attempt) tears the topic down and recreates
//! it from scratch.

use crate::broker_set::BrokerSet;
use crate::client::{BrokerAdmin, ClusterMetadata, TopicSpec};
use crate::error::{KmonError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const RECONCILE_CYCLE_TIMEOUT: Duration = Duration::from_secs(60);
const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Metadata reads hit a random broker; a create or delete must be observed
/// this many times in a row before it is trusted to have propagated.
const METADATA_SETTLE_OBSERVATIONS: u32 = 5;
const METADATA_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Reconciliation lifecycle callbacks, implemented by the supervisor.
#[async_trait]
pub trait ReconcileObserver: Send + Sync {
    /// A change was detected; the current monitor must be fully stopped
    /// before this returns, because its topic is about to be deleted.
    async fn on_change_detected(&self);

    /// The topic was recreated with `partition_count` partitions. An error
    /// marks the whole cycle failed so it is retried.
    async fn on_reconcile_done(&self, partition_count: usize) -> Result<()>;
}

/// Periodic reconciliation of the monitoring topic.
pub struct TopicManager {
    admin: Arc<dyn BrokerAdmin>,
    topic_name: String,
    reconcile_period: Duration,
    observer: Arc<dyn ReconcileObserver>,
    previous_broker_set: Option<BrokerSet>,
    reconciling: bool,
}

impl TopicManager {
    pub fn new(
        admin: Arc<dyn BrokerAdmin>,
        topic_name: String,
        reconcile_period: Duration,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        Self {
            admin,
            topic_name,
            reconcile_period,
            observer,
            previous_broker_set: None,
            reconciling: false,
        }
    }

    /// Reconciliation loop: check immediately on startup, then on every
    /// tick of the reconcile period. Failed cycles retry after a short
    /// delay with the `reconciling` latch still set.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.reconcile_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick completes immediately.
        ticker.tick().await;

        loop {
            match tokio::time::timeout(RECONCILE_CYCLE_TIMEOUT, self.maybe_reconcile(&mut shutdown))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(KmonError::Shutdown)) => {
                    info!("Stopping topic manager");
                    return;
                }
                Ok(Err(e)) => {
                    error!("Failed to reconcile topic - retrying in 5s: {}", e);
                    if sleep_or_shutdown(&mut shutdown, RECONCILE_RETRY_DELAY)
                        .await
                        .is_err()
                    {
                        info!("Stopping topic manager");
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    error!("Reconcile cycle timed out - retrying in 5s");
                    if sleep_or_shutdown(&mut shutdown, RECONCILE_RETRY_DELAY)
                        .await
                        .is_err()
                    {
                        info!("Stopping topic manager");
                        return;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stopping topic manager");
                    return;
                }
                _ = ticker.tick() => {}
            }
        }
    }

    /// One reconciliation check. Triggers when a previous attempt is still
    /// latched, the partition count disagrees with the broker count, or
    /// the broker set itself changed.
    async fn maybe_reconcile(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        debug!("Checking whether to reconcile topic");

        let metadata = self.admin.cluster_metadata(None).await?;
        let brokers = discovered_broker_set(&metadata);
        if brokers.is_empty() {
            warn!("No brokers discoverable; skipping reconciliation");
            return Ok(());
        }
        let partition_count = self.topic_partition_count(&metadata)?;

        if self.reconciling
            || partition_count != brokers.len()
            || self.previous_broker_set.as_ref() != Some(&brokers)
        {
            self.reconciling = true;
            self.observer.on_change_detected().await;
            self.recreate_topic(&brokers, shutdown).await?;
            self.previous_broker_set = Some(brokers.clone());
            self.observer.on_reconcile_done(brokers.len()).await?;
            self.reconciling = false;
        }

        Ok(())
    }

    fn topic_partition_count(&self, metadata: &ClusterMetadata) -> Result<usize> {
        match metadata.topic(&self.topic_name) {
            None => Ok(0),
            Some(topic) if topic.is_unknown() => Ok(0),
            Some(topic) => match topic.error {
                Some(code) => Err(KmonError::Internal(format!(
                    "topic '{}' metadata error: {}",
                    self.topic_name, code
                ))),
                None => Ok(topic.partitions.len()),
            },
        }
    }

    async fn recreate_topic(
        &self,
        brokers: &BrokerSet,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            "Reconciling topic {} across {} brokers",
            self.topic_name,
            brokers.len()
        );

        self.admin.delete_topic(&self.topic_name).await?;
        self.await_topic_absent(shutdown).await?;
        let spec = monitoring_topic_spec(&self.topic_name, brokers);
        self.admin.create_topic(&spec).await?;
        self.await_topic_exists(shutdown).await?;
        Ok(())
    }

    async fn await_topic_exists(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut observations = 0;
        while observations < METADATA_SETTLE_OBSERVATIONS {
            observations = match self.admin.cluster_metadata(Some(&self.topic_name)).await {
                Ok(metadata) => match metadata.topic(&self.topic_name) {
                    Some(topic) if topic.error.is_none() => observations + 1,
                    _ => 0,
                },
                Err(e) => {
                    debug!("Metadata read failed while awaiting topic: {}", e);
                    0
                }
            };
            sleep_or_shutdown(shutdown, METADATA_SETTLE_DELAY).await?;
        }
        Ok(())
    }

    async fn await_topic_absent(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut observations = 0;
        while observations < METADATA_SETTLE_OBSERVATIONS {
            observations = match self.admin.cluster_metadata(None).await {
                Ok(metadata) => match metadata.topic(&self.topic_name) {
                    None => observations + 1,
                    Some(topic) if topic.is_unknown() => observations + 1,
                    Some(_) => 0,
                },
                Err(e) => {
                    debug!("Metadata read failed while awaiting topic deletion: {}", e);
                    0
                }
            };
            sleep_or_shutdown(shutdown, METADATA_SETTLE_DELAY).await?;
        }
        Ok(())
    }
}

/// Union of the currently-live brokers and every replica owner across all
/// topics, so a temporarily unreachable broker that still owns replicas is
/// not dropped from the fleet.
fn discovered_broker_set(metadata: &ClusterMetadata) -> BrokerSet {
    let mut brokers = BrokerSet::new();
    for id in &metadata.broker_ids {
        brokers.add(*id);
    }
    for topic in &metadata.topics {
        for partition in &topic.partitions {
            for replica in &partition.replicas {
                brokers.add(*replica);
            }
        }
    }
    brokers
}

/// One partition per broker, pinned by a single replica so the leader
/// cannot move off the broker under test; log-append timestamps so the
/// broker stamps every probe.
fn monitoring_topic_spec(name: &str, brokers: &BrokerSet) -> TopicSpec {
    TopicSpec {
        name: name.to_string(),
        replica_assignment: brokers
            .items_sorted_ascending()
            .into_iter()
            .map(|id| vec![id])
            .collect(),
        configs: [
            ("message.timestamp.type", "LogAppendTime"),
            ("min.insync.replicas", "1"),
            ("retention.ms", "1800000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
}

async fn sleep_or_shutdown(
    shutdown: &mut watch::Receiver<bool>,
    duration: Duration,
) -> Result<()> {
    tokio::select! {
        _ = shutdown.changed() => Err(KmonError::Shutdown),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
