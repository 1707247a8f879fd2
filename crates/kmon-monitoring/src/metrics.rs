//! Prometheus metrics for kmon.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_gauge_vec, register_int_counter_vec, Gauge, GaugeVec, IntCounterVec,
    Registry,
};
use std::sync::Arc;

lazy_static! {
    static ref E2E_LATENCY_QUANTILE: GaugeVec = register_gauge_vec!(
        "kmon_e2e_message_latency_quantile",
        "Quantile of end-to-end message delivery latency in milliseconds",
        &["partition", "quantile"]
    )
    .unwrap();

    static ref P2B_LATENCY_QUANTILE: GaugeVec = register_gauge_vec!(
        "kmon_p2b_message_latency_quantile",
        "Quantile of producer-to-broker message latency in milliseconds",
        &["partition", "quantile"]
    )
    .unwrap();

    static ref B2C_LATENCY_QUANTILE: GaugeVec = register_gauge_vec!(
        "kmon_b2c_message_latency_quantile",
        "Quantile of broker-to-consumer message delivery latency in milliseconds",
        &["partition", "quantile"]
    )
    .unwrap();

    static ref PRODUCER_ACK_LATENCY_QUANTILE: GaugeVec = register_gauge_vec!(
        "kmon_producer_ack_latency_quantile",
        "Quantile of producer ack latency in milliseconds",
        &["partition", "quantile"]
    )
    .unwrap();

    static ref PRODUCE_MESSAGE_COUNT: IntCounterVec = register_int_counter_vec!(
        "kmon_produce_message_count",
        "Total probe messages produced",
        &["partition"]
    )
    .unwrap();

    static ref CONSUME_MESSAGE_COUNT: IntCounterVec = register_int_counter_vec!(
        "kmon_consume_message_count",
        "Total probe messages consumed",
        &["partition"]
    )
    .unwrap();

    static ref PRODUCE_MESSAGE_FAILURE_COUNT: IntCounterVec = register_int_counter_vec!(
        "kmon_produce_message_failure_count",
        "Total probe produce failures",
        &["partition"]
    )
    .unwrap();

    static ref MONITORING_TOPIC_PARTITION_COUNT: Gauge = register_gauge!(
        "kmon_monitoring_topic_partition_count",
        "Number of partitions in the monitoring topic"
    )
    .unwrap();
}

/// Latency segments exported as quantile gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySegment {
    /// Producer send to consumer receive.
    EndToEnd,
    /// Producer send to broker log append.
    ProducerToBroker,
    /// Broker log append to consumer receive.
    BrokerToConsumer,
    /// Producer send to broker ack.
    ProducerAck,
}

impl LatencySegment {
    fn gauge(&self) -> &'static GaugeVec {
        match self {
            LatencySegment::EndToEnd => &E2E_LATENCY_QUANTILE,
            LatencySegment::ProducerToBroker => &P2B_LATENCY_QUANTILE,
            LatencySegment::BrokerToConsumer => &B2C_LATENCY_QUANTILE,
            LatencySegment::ProducerAck => &PRODUCER_ACK_LATENCY_QUANTILE,
        }
    }
}

/// Metrics registry
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
}

impl MetricsRegistry {
    /// Create new metrics registry
    pub fn new() -> Self {
        let registry = Registry::new();

        registry
            .register(Box::new(E2E_LATENCY_QUANTILE.clone()))
            .unwrap();
        registry
            .register(Box::new(P2B_LATENCY_QUANTILE.clone()))
            .unwrap();
        registry
            .register(Box::new(B2C_LATENCY_QUANTILE.clone()))
            .unwrap();
        registry
            .register(Box::new(PRODUCER_ACK_LATENCY_QUANTILE.clone()))
            .unwrap();
        registry
            .register(Box::new(PRODUCE_MESSAGE_COUNT.clone()))
            .unwrap();
        registry
            .register(Box::new(CONSUME_MESSAGE_COUNT.clone()))
            .unwrap();
        registry
            .register(Box::new(PRODUCE_MESSAGE_FAILURE_COUNT.clone()))
            .unwrap();
        registry
            .register(Box::new(MONITORING_TOPIC_PARTITION_COUNT.clone()))
            .unwrap();

        Self {
            registry: Arc::new(registry),
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get probe metrics
    pub fn probe(&self) -> ProbeMetrics {
        ProbeMetrics
    }

    /// Get topic metrics
    pub fn topic(&self) -> TopicMetrics {
        TopicMetrics
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe pipeline metrics
pub struct ProbeMetrics;

impl ProbeMetrics {
    /// Record a successfully acked probe
    pub fn record_produce(&self, partition: i32) {
        PRODUCE_MESSAGE_COUNT
            .with_label_values(&[&partition.to_string()])
            .inc();
    }

    /// Record a failed probe produce
    pub fn record_produce_failure(&self, partition: i32) {
        PRODUCE_MESSAGE_FAILURE_COUNT
            .with_label_values(&[&partition.to_string()])
            .inc();
    }

    /// Record a consumed probe (or a per-partition fetch error)
    pub fn record_consume(&self, partition: i32) {
        CONSUME_MESSAGE_COUNT
            .with_label_values(&[&partition.to_string()])
            .inc();
    }

    /// Set a latency quantile gauge for one segment
    pub fn set_latency_quantile(
        &self,
        segment: LatencySegment,
        partition: i32,
        quantile: &str,
        value_ms: f64,
    ) {
        segment
            .gauge()
            .with_label_values(&[&partition.to_string(), quantile])
            .set(value_ms);
    }
}

/// Topic reconciliation metrics
pub struct TopicMetrics;

impl TopicMetrics {
    /// Set the reconciled partition count
    pub fn set_partition_count(&self, partitions: usize) {
        MONITORING_TOPIC_PARTITION_COUNT.set(partitions as f64);
    }
}
