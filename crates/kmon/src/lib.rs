//! Black-box latency monitor for Kafka clusters.
//!
//! kmon keeps a monitoring topic reconciled to one single-replica
//! partition per broker, probes every partition at a fixed cadence,
//! consumes the probes back and exports sliding-window latency quantiles
//! over Prometheus.

pub mod broker_set;
pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod supervisor;
pub mod topic_manager;

pub use broker_set::BrokerSet;
pub use config::{KafkaConfig, KmonConfig};
pub use error::{KmonError, Result};
pub use monitor::Monitor;
pub use supervisor::Supervisor;
pub use topic_manager::{ReconcileObserver, TopicManager};
