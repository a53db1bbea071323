use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    // Replication factor used when the bus creates a topic for a new message type
    #[envconfig(default = "1")]
    pub kafka_replication_factor: i32,

    // Upper bound for metadata fetches and admin operations
    #[envconfig(default = "10000")]
    pub kafka_admin_timeout_ms: u64,
}

impl KafkaConfig {
    /// Client settings shared by producers, consumers and the admin client.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_admin_timeout_ms)
    }
}

/// Per-subscription consumer settings. Unlike `KafkaConfig` these are decided by
/// the code creating the consumer, so they are not read from the environment.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,
    pub kafka_consumer_client_id: String,

    // earliest, latest
    pub kafka_consumer_offset_reset: String,

    // When disabled, offsets are only committed through `SingleTopicConsumer::commit_last`
    pub kafka_consumer_auto_commit: bool,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_usable_without_environment() {
        let config = KafkaConfig::init_from_hashmap(&HashMap::new()).expect("defaults are valid");

        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka_replication_factor, 1);
        assert_eq!(config.admin_timeout(), Duration::from_secs(10));
        assert!(!config.kafka_tls);
    }

    #[test]
    fn tls_settings_are_applied() {
        let mut vars = HashMap::new();
        vars.insert("KAFKA_TLS".to_string(), "true".to_string());
        vars.insert("KAFKA_HOSTS".to_string(), "kafka-1:9093".to_string());
        let config = KafkaConfig::init_from_hashmap(&vars).expect("valid config");

        let client_config = config.client_config();
        assert_eq!(client_config.get("bootstrap.servers"), Some("kafka-1:9093"));
        assert_eq!(client_config.get("security.protocol"), Some("ssl"));
    }
}
