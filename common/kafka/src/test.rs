use std::collections::HashMap;

use envconfig::Envconfig;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::DefaultProducerContext;

use crate::config::KafkaConfig;

/// Starts an in-process mock broker and returns a config pointing at it.
/// The cluster shuts down when dropped, so keep it alive for the whole test.
pub fn create_mock_kafka() -> (MockCluster<'static, DefaultProducerContext>, KafkaConfig) {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");

    let mut config =
        KafkaConfig::init_from_hashmap(&HashMap::new()).expect("default kafka config is valid");
    config.kafka_producer_linger_ms = 0;
    config.kafka_producer_queue_mib = 50;
    config.kafka_message_timeout_ms = 5000;
    config.kafka_hosts = cluster.bootstrap_servers();

    (cluster, config)
}
