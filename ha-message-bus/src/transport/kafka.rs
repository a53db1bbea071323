use std::collections::HashSet;
use std::time::Duration;

use common_kafka::admin::TopicAdmin;
use common_kafka::config::{ConsumerConfig as KafkaConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::{create_kafka_producer, send_batch_blocking, KafkaContext};
use rdkafka::producer::FutureProducer;
use tracing::{debug, error};

use crate::consumer::ConsumerConfig;
use crate::error::TransportError;
use crate::message::Message;
use crate::transport::{Transport, TransportAdmin, TransportReceiver, TransportSender};

/// Maps message types one to one onto Kafka topics.
pub struct KafkaTransport {
    config: KafkaConfig,
}

impl KafkaTransport {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl Transport for KafkaTransport {
    fn admin(&self, admin_id: &str) -> Result<Box<dyn TransportAdmin>, TransportError> {
        let admin = TopicAdmin::new(&self.config, admin_id)?;
        Ok(Box::new(KafkaAdmin { admin }))
    }

    fn sender(
        &self,
        producer_id: &str,
        message_type: &str,
    ) -> Result<Box<dyn TransportSender>, TransportError> {
        debug!("creating kafka producer {} for {}", producer_id, message_type);
        let producer = create_kafka_producer(&self.config)?;
        Ok(Box::new(KafkaSender {
            producer,
            topic: message_type.to_string(),
        }))
    }

    fn receiver(
        &self,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn TransportReceiver>, TransportError> {
        let consumer_config = KafkaConsumerConfig {
            kafka_consumer_group: config.consumer_group.clone(),
            kafka_consumer_topic: config.message_type.clone(),
            kafka_consumer_client_id: config.consumer_id.clone(),
            kafka_consumer_offset_reset: config.offset.as_str().to_string(),
            kafka_consumer_auto_commit: config.auto_ack,
        };
        let consumer = SingleTopicConsumer::new(&self.config, &consumer_config)?;
        Ok(Box::new(KafkaReceiver { consumer }))
    }
}

struct KafkaAdmin {
    admin: TopicAdmin,
}

impl TransportAdmin for KafkaAdmin {
    fn list_message_types(&self) -> Result<HashSet<String>, TransportError> {
        Ok(self.admin.list_topics()?)
    }

    fn register_message_types(
        &self,
        message_types: &[&str],
        partitions: i32,
    ) -> Result<(), TransportError> {
        Ok(self.admin.create_topics(message_types, partitions)?)
    }

    fn deregister_message_types(&self, message_types: &[&str]) -> Result<(), TransportError> {
        Ok(self.admin.delete_topics(message_types)?)
    }
}

struct KafkaSender {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl TransportSender for KafkaSender {
    fn send(&self, messages: &[String]) -> Result<(), TransportError> {
        let mut first_error = None;
        for (position, result) in send_batch_blocking(&self.producer, &self.topic, messages)
            .into_iter()
            .enumerate()
        {
            if let Err(err) = result {
                error!(
                    "failed to deliver message {} of {} to {}: {}",
                    position,
                    messages.len(),
                    self.topic,
                    err
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

struct KafkaReceiver {
    consumer: SingleTopicConsumer,
}

impl TransportReceiver for KafkaReceiver {
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        let received = self.consumer.recv(timeout)?;
        Ok(received.map(|received| Message {
            message_type: received.topic,
            partition: received.partition,
            offset: received.offset,
            payload: received.payload,
        }))
    }

    fn ack(&mut self) -> Result<(), TransportError> {
        Ok(self.consumer.commit_last()?)
    }
}

#[cfg(test)]
mod tests {
    use common_kafka::test::create_mock_kafka;

    use super::*;

    #[test]
    fn publishes_and_acknowledges_through_kafka() {
        let (_cluster, config) = create_mock_kafka();
        let transport = KafkaTransport::new(config);

        let admin = transport.admin("ha_admin").unwrap();
        admin.register_message_types(&["ha_event_test"], 1).unwrap();
        assert!(admin
            .list_message_types()
            .unwrap()
            .contains("ha_event_test"));
        assert!(matches!(
            admin.register_message_types(&["ha_event_test"], 1),
            Err(TransportError::AlreadyExists(_))
        ));

        let sender = transport.sender("producer", "ha_event_test").unwrap();
        sender
            .send(&["first".to_string(), "second".to_string()])
            .unwrap();

        let mut receiver = transport
            .receiver(&ConsumerConfig::new("c1", "ha", "ha_event_test"))
            .unwrap();
        let mut payloads = Vec::new();
        for _ in 0..50 {
            if let Some(message) = receiver.receive(Some(Duration::from_millis(200))).unwrap() {
                payloads.push(message.payload_str().unwrap().to_string());
                receiver.ack().unwrap();
            }
            if payloads.len() == 2 {
                break;
            }
        }

        assert_eq!(payloads, vec!["first", "second"]);
    }
}
