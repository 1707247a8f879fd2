//! Probe producer, consumer and quantile publisher.
//!
//! A monitor owns one producer and one consumer, a fixed partition set and
//! four sliding-window trackers per partition. It stamps every probe with
//! its instance UUID so records from a torn-down predecessor (or another
//! kmon entirely) are dropped on the floor instead of polluting the
//! window.

use crate::client;
use crate::config::KmonConfig;
use crate::error::{KmonError, Result};
use kmon_monitoring::{LatencySegment, ProbeMetrics};
use kmon_stats::{Clock, SystemClock, WindowedStats};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const WARMUP_DELAY: Duration = Duration::from_secs(3);
const QUANTILE_PUBLISH_PERIOD: Duration = Duration::from_secs(1);
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const QUANTILES: [f64; 2] = [50.0, 99.0];
const QUANTILE_LABELS: [&str; 2] = ["p50", "p99"];

/// The four latency segments tracked per partition.
struct PartitionStats {
    e2e: WindowedStats,
    p2b: WindowedStats,
    b2c: WindowedStats,
    producer_ack: WindowedStats,
}

impl PartitionStats {
    fn new(window: Duration) -> Self {
        Self {
            e2e: WindowedStats::new(window),
            p2b: WindowedStats::new(window),
            b2c: WindowedStats::new(window),
            producer_ack: WindowedStats::new(window),
        }
    }
}

/// Probe engine for one reconciled topic layout.
pub struct Monitor {
    producer: FutureProducer,
    consumer: Arc<StreamConsumer>,
    producer_topic: String,
    consume_topic: String,
    instance_uuid: String,
    partitions: Vec<i32>,
    stats: HashMap<i32, PartitionStats>,
    sample_period: Duration,
    mirror_mode: bool,
    metrics: ProbeMetrics,
}

impl Monitor {
    /// Builds a monitor for `partition_count` partitions with fresh
    /// clients, fresh stats and a fresh instance UUID.
    pub fn from_config(config: &KmonConfig, partition_count: usize) -> Result<Self> {
        let instance_uuid = Uuid::new_v4().to_string();
        let producer = client::future_producer(&config.producer_kafka_config)?;

        let (consumer, consume_topic, mirror_mode) = match &config.consumer_kafka_config {
            None => {
                let consumer = client::stream_consumer(&config.producer_kafka_config, &instance_uuid)?;
                (consumer, config.producer_monitoring_topic.clone(), false)
            }
            Some(consumer_config) => {
                let consumer = client::stream_consumer(consumer_config, &instance_uuid)?;
                let topic = config.consumer_monitoring_topic.clone().ok_or_else(|| {
                    KmonError::Config("consumerMonitoringTopic is required in mirror mode".to_string())
                })?;
                (consumer, topic, true)
            }
        };

        Ok(Self::new(
            producer,
            Arc::new(consumer),
            config.producer_monitoring_topic.clone(),
            consume_topic,
            instance_uuid,
            (0..partition_count as i32).collect(),
            config.sample_period(),
            config.stats_window(),
            mirror_mode,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        producer: FutureProducer,
        consumer: Arc<StreamConsumer>,
        producer_topic: String,
        consume_topic: String,
        instance_uuid: String,
        partitions: Vec<i32>,
        sample_period: Duration,
        stats_window: Duration,
        mirror_mode: bool,
    ) -> Self {
        // In mirror mode every record collapses into bucket 0 regardless
        // of the partition it arrived on.
        let stats = if mirror_mode {
            [(0, PartitionStats::new(stats_window))].into_iter().collect()
        } else {
            partitions
                .iter()
                .map(|&p| (p, PartitionStats::new(stats_window)))
                .collect()
        };

        Self {
            producer,
            consumer,
            producer_topic,
            consume_topic,
            instance_uuid,
            partitions,
            stats,
            sample_period,
            mirror_mode,
            metrics: ProbeMetrics,
        }
    }

    pub fn instance_uuid(&self) -> &str {
        &self.instance_uuid
    }

    /// Runs the probe pipeline until the monitor-scoped shutdown channel
    /// fires: warm-up, then the consume loop, the quantile publisher and
    /// the sample loop.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting monitor instance {}", self.instance_uuid);
        let monitor = Arc::new(self);

        if let Err(e) = monitor.assign_consumer() {
            error!("Failed to assign consumer partitions: {}", e);
            return;
        }

        if !monitor.warmup(&mut shutdown).await {
            return;
        }

        let consume_task = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            let shutdown = shutdown.clone();
            async move { monitor.consume_loop(shutdown).await }
        });
        let publish_task = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            let shutdown = shutdown.clone();
            async move { monitor.publish_quantiles_loop(shutdown).await }
        });

        let mut ticker = tokio::time::interval(monitor.sample_period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => monitor.publish_probe_batch(),
            }
        }

        info!("Stopping monitor instance {}", monitor.instance_uuid);
        let _ = monitor.producer.flush(Timeout::After(SHUTDOWN_FLUSH_TIMEOUT));
        let _ = tokio::join!(consume_task, publish_task);
    }

    /// Subscribes the consumer to every partition of the consume topic at
    /// the log end; the probe backlog retained from earlier instances is
    /// never replayed.
    fn assign_consumer(&self) -> Result<()> {
        let mut assignment = TopicPartitionList::new();
        if self.mirror_mode {
            let metadata = self
                .consumer
                .fetch_metadata(Some(&self.consume_topic), Duration::from_secs(10))?;
            for topic in metadata.topics() {
                for partition in topic.partitions() {
                    assignment.add_partition_offset(
                        &self.consume_topic,
                        partition.id(),
                        Offset::End,
                    )?;
                }
            }
        } else {
            for &partition in &self.partitions {
                assignment.add_partition_offset(&self.consume_topic, partition, Offset::End)?;
            }
        }
        self.consumer.assign(&assignment)?;
        Ok(())
    }

    /// First probe batch drives metadata discovery and connection setup;
    /// the pause keeps those costs out of the measurements.
    async fn warmup(self: &Arc<Self>, shutdown: &mut watch::Receiver<bool>) -> bool {
        self.publish_probe_batch();
        tokio::select! {
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(WARMUP_DELAY) => true,
        }
    }

    fn publish_probe_batch(self: &Arc<Self>) {
        for &partition in &self.partitions {
            self.publish_probe(partition);
        }
    }

    /// Sends one probe: key = instance UUID, value = producer timestamp in
    /// nanoseconds, explicitly partitioned. The delivery future is awaited
    /// on a separate task so a slow ack never stalls the sample loop.
    fn publish_probe(self: &Arc<Self>, partition: i32) {
        let sent_at = Instant::now();
        let value = (SystemClock.now().as_nanos() as i64).to_string();
        let record = FutureRecord::to(&self.producer_topic)
            .partition(partition)
            .key(&self.instance_uuid)
            .payload(&value);
        let bucket = if self.mirror_mode { 0 } else { partition };

        match self.producer.send_result(record) {
            Err((e, _)) => {
                warn!("Failed to enqueue probe for partition {}: {}", partition, e);
                self.metrics.record_produce_failure(bucket);
            }
            Ok(delivery) => {
                let monitor = Arc::clone(self);
                tokio::spawn(async move {
                    match delivery.await {
                        Ok(Ok(_)) => {
                            if let Some(stats) = monitor.stats.get(&bucket) {
                                stats.producer_ack.add(sent_at.elapsed().as_millis() as i64);
                            }
                            monitor.metrics.record_produce(bucket);
                        }
                        Ok(Err((e, _))) => {
                            debug!("Probe delivery failed for partition {}: {}", partition, e);
                            monitor.metrics.record_produce_failure(bucket);
                        }
                        // The producer went away mid-flight; the probe is
                        // simply lost.
                        Err(_) => monitor.metrics.record_produce_failure(bucket),
                    }
                });
            }
        }
    }

    async fn consume_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                result = self.consumer.recv() => match result {
                    Ok(message) => {
                        let receive_time_ms = SystemClock.now().as_millis() as i64;
                        self.handle_consumed_record(
                            message.key(),
                            message.payload(),
                            message.partition(),
                            message.timestamp().to_millis(),
                            receive_time_ms,
                        );
                    }
                    Err(e) => warn!("Fetch error: {}", e),
                }
            }
        }
    }

    /// Attributes one consumed record to the three latency segments.
    ///
    /// Foreign or stale probes (wrong key) and unparseable values are
    /// dropped silently; the broker's log-append timestamp splits the
    /// end-to-end path into producer-to-broker and broker-to-consumer.
    fn handle_consumed_record(
        &self,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
        partition: i32,
        append_time_ms: Option<i64>,
        receive_time_ms: i64,
    ) {
        if key != Some(self.instance_uuid.as_bytes()) {
            return;
        }

        let sent_at_nanos: i64 = match payload
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| v.parse().ok())
        {
            Some(nanos) => nanos,
            None => return,
        };
        let sent_at_ms = sent_at_nanos / 1_000_000;

        let bucket = if self.mirror_mode { 0 } else { partition };
        let stats = match self.stats.get(&bucket) {
            Some(stats) => stats,
            None => return,
        };

        stats.e2e.add(receive_time_ms - sent_at_ms);
        if let Some(append_ms) = append_time_ms {
            stats.p2b.add(append_ms - sent_at_ms);
            stats.b2c.add(receive_time_ms - append_ms);
        }
        self.metrics.record_consume(bucket);
    }

    async fn publish_quantiles_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(QUANTILE_PUBLISH_PERIOD);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => self.publish_quantiles(),
            }
        }
    }

    fn publish_quantiles(&self) {
        for (&partition, stats) in &self.stats {
            self.update_quantiles(&stats.e2e, LatencySegment::EndToEnd, partition);
            self.update_quantiles(&stats.p2b, LatencySegment::ProducerToBroker, partition);
            self.update_quantiles(&stats.b2c, LatencySegment::BrokerToConsumer, partition);
            self.update_quantiles(&stats.producer_ack, LatencySegment::ProducerAck, partition);
        }
    }

    fn update_quantiles(&self, stats: &WindowedStats, segment: LatencySegment, partition: i32) {
        let values = match stats.percentiles(&QUANTILES) {
            Some(values) => values,
            // Empty window; leave the gauges at their last published value.
            None => return,
        };
        for (label, value) in QUANTILE_LABELS.iter().zip(values) {
            self.metrics
                .set_latency_quantile(segment, partition, label, value as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaConfig;

    fn test_monitor(mirror_mode: bool) -> Monitor {
        let kafka_config = KafkaConfig {
            seed_brokers: vec!["localhost:9092".to_string()],
        };
        // Client construction is lazy; nothing here talks to a broker.
        // rdkafka's async runtime glue needs a Tokio context to spawn its
        // background poll task onto even for this lazy construction.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let producer = client::future_producer(&kafka_config).unwrap();
        let consumer = client::stream_consumer(&kafka_config, "test-uuid").unwrap();
        Monitor::new(
            producer,
            Arc::new(consumer),
            "kmon-probes".to_string(),
            "kmon-probes".to_string(),
            "test-uuid".to_string(),
            vec![0, 1, 2],
            Duration::from_millis(100),
            Duration::from_secs(300),
            mirror_mode,
        )
    }

    #[test]
    fn attributes_latency_segments_per_partition() {
        let monitor = test_monitor(false);

        // Sent at 1000ms, appended at 1040ms, received at 1100ms.
        monitor.handle_consumed_record(
            Some(b"test-uuid"),
            Some(1_000_000_000i64.to_string().as_bytes()),
            1,
            Some(1_040),
            1_100,
        );

        let stats = &monitor.stats[&1];
        assert_eq!(stats.e2e.values_ascending(), vec![100]);
        assert_eq!(stats.p2b.values_ascending(), vec![40]);
        assert_eq!(stats.b2c.values_ascending(), vec![60]);
        assert_eq!(monitor.stats[&0].e2e.len(), 0);
        assert_eq!(monitor.stats[&2].e2e.len(), 0);
    }

    #[test]
    fn foreign_keys_are_dropped() {
        let monitor = test_monitor(false);

        monitor.handle_consumed_record(
            Some(b"some-other-instance"),
            Some(1_000_000_000i64.to_string().as_bytes()),
            0,
            Some(1_040),
            1_100,
        );
        monitor.handle_consumed_record(
            None,
            Some(1_000_000_000i64.to_string().as_bytes()),
            0,
            Some(1_040),
            1_100,
        );

        for partition in [0, 1, 2] {
            let stats = &monitor.stats[&partition];
            assert_eq!(stats.e2e.len(), 0);
            assert_eq!(stats.p2b.len(), 0);
            assert_eq!(stats.b2c.len(), 0);
        }
    }

    #[test]
    fn unparseable_values_are_dropped() {
        let monitor = test_monitor(false);

        monitor.handle_consumed_record(Some(b"test-uuid"), Some(b"not-a-number"), 0, Some(10), 20);
        monitor.handle_consumed_record(Some(b"test-uuid"), None, 0, Some(10), 20);

        assert_eq!(monitor.stats[&0].e2e.len(), 0);
    }

    #[test]
    fn missing_append_timestamp_still_counts_e2e() {
        let monitor = test_monitor(false);

        monitor.handle_consumed_record(
            Some(b"test-uuid"),
            Some(1_000_000_000i64.to_string().as_bytes()),
            2,
            None,
            1_100,
        );

        let stats = &monitor.stats[&2];
        assert_eq!(stats.e2e.values_ascending(), vec![100]);
        assert_eq!(stats.p2b.len(), 0);
        assert_eq!(stats.b2c.len(), 0);
    }

    #[test]
    fn mirror_mode_collapses_partitions_into_bucket_zero() {
        let monitor = test_monitor(true);
        assert_eq!(monitor.stats.len(), 1);

        for partition in [0, 1, 2] {
            monitor.handle_consumed_record(
                Some(b"test-uuid"),
                Some(1_000_000_000i64.to_string().as_bytes()),
                partition,
                Some(1_040),
                1_100,
            );
        }

        assert_eq!(monitor.stats[&0].e2e.len(), 3);
    }

    #[test]
    fn unknown_partition_is_dropped_without_panic() {
        let monitor = test_monitor(false);

        monitor.handle_consumed_record(
            Some(b"test-uuid"),
            Some(1_000_000_000i64.to_string().as_bytes()),
            7,
            Some(1_040),
            1_100,
        );

        for partition in [0, 1, 2] {
            assert_eq!(monitor.stats[&partition].e2e.len(), 0);
        }
    }

    #[test]
    fn bulk_records_fill_every_partition_window() {
        use rand::prelude::*;
        let monitor = test_monitor(false);
        let mut rng = StdRng::seed_from_u64(11);

        let base_ms: i64 = 1_700_000_000_000;
        for partition in [0, 1, 2] {
            for _ in 0..400 {
                let latency = rng.gen_range(0..1_000);
                let sent_ms = base_ms - latency;
                monitor.handle_consumed_record(
                    Some(b"test-uuid"),
                    Some((sent_ms * 1_000_000).to_string().as_bytes()),
                    partition,
                    Some(base_ms - latency / 2),
                    base_ms,
                );
            }
        }

        for partition in [0, 1, 2] {
            assert_eq!(monitor.stats[&partition].e2e.len(), 400);
            assert_eq!(monitor.stats[&partition].p2b.len(), 400);
            assert_eq!(monitor.stats[&partition].b2c.len(), 400);
        }
    }
}
