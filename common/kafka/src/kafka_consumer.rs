use std::time::Duration;

use rdkafka::{
    consumer::{BaseConsumer, CommitMode, Consumer},
    error::KafkaError,
    Message, Offset, TopicPartitionList,
};
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};

/// Blocking consumer bound to a single topic, meant to be driven from a
/// dedicated thread. Offsets are committed one message at a time.
pub struct SingleTopicConsumer {
    consumer: BaseConsumer,
    topic: String,
    last_received: Option<(i32, i64)>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("No message received yet")]
    NothingReceived,
}

/// A message copied out of the consumer, so it can outlive the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set("client.id", &consumer_config.kafka_consumer_client_id)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set("enable.partition.eof", "false");

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: BaseConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
            last_received: None,
        })
    }

    /// Waits up to `timeout` for the next message, `None` waits forever.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<ReceivedMessage>, RecvErr> {
        let Some(result) = self.consumer.poll(timeout) else {
            return Ok(None);
        };
        let message = result?;

        let received = ReceivedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        };
        self.last_received = Some((received.partition, received.offset));

        Ok(Some(received))
    }

    /// Synchronously commits the position right after the last received message.
    pub fn commit_last(&mut self) -> Result<(), OffsetErr> {
        let (partition, offset) = self.last_received.ok_or(OffsetErr::NothingReceived)?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;

        Ok(())
    }
}
