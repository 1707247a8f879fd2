//! Supervision of the topic manager and the active monitor.
//!
//! Reconciliation and probing are coupled through two callbacks: before
//! the topic is torn down the old monitor must be fully stopped, and once
//! the new layout settles a fresh monitor (fresh UUID, fresh stats) is
//! spawned against it. At most one monitor runs at any time.

use crate::client::{BrokerAdmin, KafkaAdmin};
use crate::config::KmonConfig;
use crate::error::Result;
use crate::monitor::Monitor;
use crate::topic_manager::{ReconcileObserver, TopicManager};
use async_trait::async_trait;
use kmon_monitoring::TopicMetrics;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

struct ActiveMonitor {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
    instance_uuid: String,
}

/// Owns the reconciliation loop and the currently running monitor.
pub struct Supervisor {
    config: KmonConfig,
    admin: Arc<dyn BrokerAdmin>,
    active: Mutex<Option<ActiveMonitor>>,
}

impl Supervisor {
    pub fn new(config: KmonConfig) -> Result<Arc<Self>> {
        let admin = KafkaAdmin::new(&config.producer_kafka_config)?;
        Ok(Arc::new(Self {
            config,
            admin: Arc::new(admin),
            active: Mutex::new(None),
        }))
    }

    /// Drives reconciliation until `shutdown` fires, then tears down the
    /// active monitor. The monitor's own shutdown channel is scoped under
    /// this one, so root shutdown cancels it transitively.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let manager = TopicManager::new(
            Arc::clone(&self.admin),
            self.config.producer_monitoring_topic.clone(),
            self.config.reconcile_period(),
            Arc::clone(&self) as Arc<dyn ReconcileObserver>,
        );
        manager.run(shutdown).await;
        self.stop_monitor().await;
    }

    /// UUID of the monitor currently running, if any.
    pub async fn active_monitor_uuid(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.instance_uuid.clone())
    }

    async fn stop_monitor(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            let _ = active.cancel.send(true);
            // The old consume loop must not outlive its topic assignment.
            if let Err(e) = active.handle.await {
                error!("Monitor task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl ReconcileObserver for Supervisor {
    async fn on_change_detected(&self) {
        self.stop_monitor().await;
    }

    async fn on_reconcile_done(&self, partition_count: usize) -> Result<()> {
        let monitor = Monitor::from_config(&self.config, partition_count)?;
        let instance_uuid = monitor.instance_uuid().to_string();
        info!(
            "Spawning monitor instance {} over {} partitions",
            instance_uuid, partition_count
        );

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.start(cancel_rx));
        *self.active.lock().await = Some(ActiveMonitor {
            cancel,
            handle,
            instance_uuid,
        });
        TopicMetrics.set_partition_count(partition_count);
        Ok(())
    }
}
