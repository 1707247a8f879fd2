//! JSON configuration for kmon.

use crate::error::{KmonError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_SAMPLE_FREQUENCY_MS: u64 = 100;
const DEFAULT_STATS_WINDOW_SECONDS: u64 = 60;
const DEFAULT_RECONCILIATION_FREQUENCY_MIN: u64 = 60;

/// Seed addresses for one Kafka cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    pub seed_brokers: Vec<String>,
}

/// Top-level kmon configuration.
///
/// A present `consumerKafkaConfig` switches the monitor into mirror mode:
/// probes are produced into one cluster and consumed from another, and all
/// partitions collapse into a single statistics bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmonConfig {
    pub producer_kafka_config: KafkaConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_kafka_config: Option<KafkaConfig>,
    pub producer_monitoring_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_monitoring_topic: Option<String>,
    #[serde(default)]
    pub sample_frequency_ms: Option<u64>,
    #[serde(default)]
    pub stats_window_seconds: Option<u64>,
    #[serde(default)]
    pub topic_reconciliation_frequency_min: Option<u64>,
}

impl KmonConfig {
    /// Read and decode a configuration file, then validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: KmonConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: KmonConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the probe pipeline cannot start from.
    pub fn validate(&self) -> Result<()> {
        validate_kafka_config(&self.producer_kafka_config, "producerKafkaConfig")?;
        if self.producer_monitoring_topic.is_empty() {
            return Err(KmonError::Config(
                "producerMonitoringTopic must not be empty".to_string(),
            ));
        }
        if let Some(consumer) = &self.consumer_kafka_config {
            validate_kafka_config(consumer, "consumerKafkaConfig")?;
            match &self.consumer_monitoring_topic {
                Some(topic) if !topic.is_empty() => {}
                _ => {
                    return Err(KmonError::Config(
                        "consumerMonitoringTopic is required in mirror mode".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Mirror mode is selected by the presence of a consumer cluster.
    pub fn mirror_mode(&self) -> bool {
        self.consumer_kafka_config.is_some()
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(non_zero_or(
            self.sample_frequency_ms,
            DEFAULT_SAMPLE_FREQUENCY_MS,
        ))
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(non_zero_or(
            self.stats_window_seconds,
            DEFAULT_STATS_WINDOW_SECONDS,
        ))
    }

    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(
            non_zero_or(
                self.topic_reconciliation_frequency_min,
                DEFAULT_RECONCILIATION_FREQUENCY_MIN,
            ) * 60,
        )
    }
}

/// Zero counts as unset, matching the JSON convention of omitted fields.
fn non_zero_or(value: Option<u64>, default: u64) -> u64 {
    value.filter(|v| *v != 0).unwrap_or(default)
}

fn validate_kafka_config(config: &KafkaConfig, field: &str) -> Result<()> {
    if config.seed_brokers.is_empty() {
        return Err(KmonError::Config(format!(
            "{field}.seedBrokers must list at least one broker"
        )));
    }
    if config.seed_brokers.iter().any(|b| b.is_empty()) {
        return Err(KmonError::Config(format!(
            "{field}.seedBrokers must not contain empty addresses"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["localhost:9092"]},
                "producerMonitoringTopic": "kmon-probes"
            }"#,
        )
        .unwrap();

        assert!(!config.mirror_mode());
        assert_eq!(config.sample_period(), Duration::from_millis(100));
        assert_eq!(config.stats_window(), Duration::from_secs(60));
        assert_eq!(config.reconcile_period(), Duration::from_secs(3600));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["localhost:9092"]},
                "producerMonitoringTopic": "kmon-probes",
                "sampleFrequencyMs": 250,
                "statsWindowSeconds": 120,
                "topicReconciliationFrequencyMin": 5
            }"#,
        )
        .unwrap();

        assert_eq!(config.sample_period(), Duration::from_millis(250));
        assert_eq!(config.stats_window(), Duration::from_secs(120));
        assert_eq!(config.reconcile_period(), Duration::from_secs(300));
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let config = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["localhost:9092"]},
                "producerMonitoringTopic": "kmon-probes",
                "sampleFrequencyMs": 0
            }"#,
        )
        .unwrap();
        assert_eq!(config.sample_period(), Duration::from_millis(100));
    }

    #[test]
    fn mirror_mode_requires_consumer_topic() {
        let result = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["a:9092"]},
                "consumerKafkaConfig": {"seedBrokers": ["b:9092"]},
                "producerMonitoringTopic": "kmon-probes"
            }"#,
        );
        assert!(matches!(result, Err(KmonError::Config(_))));

        let config = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["a:9092"]},
                "consumerKafkaConfig": {"seedBrokers": ["b:9092"]},
                "producerMonitoringTopic": "kmon-probes",
                "consumerMonitoringTopic": "kmon-probes-mirror"
            }"#,
        )
        .unwrap();
        assert!(config.mirror_mode());
    }

    #[test]
    fn rejects_missing_or_empty_seed_brokers() {
        let result = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": []},
                "producerMonitoringTopic": "kmon-probes"
            }"#,
        );
        assert!(matches!(result, Err(KmonError::Config(_))));

        let result = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": [""]},
                "producerMonitoringTopic": "kmon-probes"
            }"#,
        );
        assert!(matches!(result, Err(KmonError::Config(_))));
    }

    #[test]
    fn rejects_empty_topic() {
        let result = KmonConfig::from_json(
            r#"{
                "producerKafkaConfig": {"seedBrokers": ["localhost:9092"]},
                "producerMonitoringTopic": ""
            }"#,
        );
        assert!(matches!(result, Err(KmonError::Config(_))));
    }
}
