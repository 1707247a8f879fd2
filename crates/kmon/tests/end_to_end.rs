//! End-to-end test against a live Kafka cluster.
//!
//! Requires a local 3-broker cluster reachable on localhost:9092. Run
//! with: cargo test -p kmon --test end_to_end -- --ignored

use kmon::{KmonConfig, Supervisor};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;

const BOOTSTRAP: &str = "localhost:9092";
const TOPIC: &str = "kmon-e2e";
const EXPECTED_BROKERS: usize = 3;

fn admin() -> AdminClient<DefaultClientContext> {
    ClientConfig::new()
        .set("bootstrap.servers", BOOTSTRAP)
        .create()
        .expect("admin client")
}

fn topic_partition_replicas(admin: &AdminClient<DefaultClientContext>) -> Option<Vec<Vec<i32>>> {
    let metadata = admin
        .inner()
        .fetch_metadata(Some(TOPIC), Duration::from_secs(10))
        .ok()?;
    let topic = metadata.topics().iter().find(|t| t.name() == TOPIC)?;
    if topic.error().is_some() {
        return None;
    }
    Some(
        topic
            .partitions()
            .iter()
            .map(|p| p.replicas().to_vec())
            .collect(),
    )
}

async fn await_partition_count(
    admin: &AdminClient<DefaultClientContext>,
    expected: usize,
    deadline: Duration,
) -> Vec<Vec<i32>> {
    let start = Instant::now();
    loop {
        if let Some(layout) = topic_partition_replicas(admin) {
            if layout.len() == expected {
                return layout;
            }
        }
        assert!(
            start.elapsed() < deadline,
            "topic never reached {expected} partitions"
        );
        sleep(Duration::from_millis(500)).await;
    }
}

fn consume_counts_by_partition() -> Vec<(String, u64)> {
    prometheus::default_registry()
        .gather()
        .iter()
        .filter(|family| family.get_name() == "kmon_consume_message_count")
        .flat_map(|family| family.get_metric())
        .map(|metric| {
            let partition = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == "partition")
                .map(|l| l.get_value().to_string())
                .unwrap_or_default();
            (partition, metric.get_counter().get_value() as u64)
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a local 3-broker Kafka cluster"]
async fn reconciles_probes_and_recovers_from_external_changes() {
    let external_admin = admin();

    // Start from a clean slate.
    let _ = external_admin
        .delete_topics(&[TOPIC], &AdminOptions::new())
        .await;
    sleep(Duration::from_secs(2)).await;

    let config = KmonConfig::from_json(&format!(
        r#"{{
            "producerKafkaConfig": {{"seedBrokers": ["{BOOTSTRAP}"]}},
            "producerMonitoringTopic": "{TOPIC}",
            "sampleFrequencyMs": 100,
            "topicReconciliationFrequencyMin": 1
        }}"#
    ))
    .expect("config");

    let supervisor = Supervisor::new(config).expect("supervisor");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(supervisor.clone().run(shutdown_rx));

    // One partition per broker, one replica per partition, replicas
    // covering the whole fleet.
    let layout = await_partition_count(&external_admin, EXPECTED_BROKERS, Duration::from_secs(60)).await;
    let mut replica_owners = HashSet::new();
    for replicas in &layout {
        assert_eq!(replicas.len(), 1, "partition must have exactly one replica");
        replica_owners.insert(replicas[0]);
    }
    assert_eq!(replica_owners.len(), EXPECTED_BROKERS);

    let first_uuid = supervisor
        .active_monitor_uuid()
        .await
        .expect("monitor running");

    // Let probes flow, then check every partition produced measurements.
    sleep(Duration::from_secs(15)).await;
    let counts = consume_counts_by_partition();
    for partition in 0..EXPECTED_BROKERS {
        let count = counts
            .iter()
            .find(|(p, _)| p == &partition.to_string())
            .map(|(_, c)| *c)
            .unwrap_or(0);
        assert!(count > 0, "partition {partition} consumed no probes");
    }

    // External deletion: a new monitor instance must appear with a fresh
    // UUID once reconciliation notices.
    external_admin
        .delete_topics(&[TOPIC], &AdminOptions::new())
        .await
        .expect("external delete");
    let start = Instant::now();
    let second_uuid = loop {
        if let Some(uuid) = supervisor.active_monitor_uuid().await {
            if uuid != first_uuid {
                break uuid;
            }
        }
        assert!(
            start.elapsed() < Duration::from_secs(120),
            "monitor was never rebuilt after external topic deletion"
        );
        sleep(Duration::from_millis(500)).await;
    };
    await_partition_count(&external_admin, EXPECTED_BROKERS, Duration::from_secs(60)).await;

    // External recreation with the wrong partition count: reconciliation
    // must override it back to one partition per broker.
    external_admin
        .delete_topics(&[TOPIC], &AdminOptions::new())
        .await
        .expect("external delete");
    sleep(Duration::from_secs(2)).await;
    let wrong_topic = NewTopic::new(TOPIC, 4, TopicReplication::Fixed(1))
        .set("min.insync.replicas", "1");
    external_admin
        .create_topics(&[wrong_topic], &AdminOptions::new())
        .await
        .expect("external create");

    let layout = await_partition_count(&external_admin, EXPECTED_BROKERS, Duration::from_secs(120)).await;
    assert_eq!(layout.len(), EXPECTED_BROKERS);
    let third_uuid = supervisor
        .active_monitor_uuid()
        .await
        .expect("monitor running");
    assert_ne!(second_uuid, third_uuid);

    let _ = shutdown_tx.send(true);
    run.await.expect("supervisor run");
    let _ = external_admin
        .delete_topics(&[TOPIC], &AdminOptions::new())
        .await;
}
