//! Metrics and log plumbing for kmon.

pub mod metrics;
pub mod server;
pub mod tracing;

pub use self::metrics::{LatencySegment, MetricsRegistry, ProbeMetrics, TopicMetrics};
pub use self::server::MetricsServer;
pub use self::tracing::init_tracing;
