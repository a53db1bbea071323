use common_kafka::admin::AdminError;
use common_kafka::kafka_consumer::{OffsetErr, RecvErr};
use common_kafka::kafka_producer::KafkaProduceError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::config_store::ConfigStoreError;

/// Errors surfaced to callers of the bus facade and producers.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("invalid type of message: {0}")]
    InvalidPayloadType(String),
    #[error("failed to initialize message bus transport: {0}")]
    TransportInit(String),
    #[error("failed to register message type {message_type}: {error}")]
    Registration {
        message_type: String,
        error: TransportError,
    },
    #[error("message bus used before init")]
    NotInitialized,
    #[error("consumer {0} was already started")]
    AlreadyStarted(String),
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ConfigStoreError> for BusError {
    fn from(error: ConfigStoreError) -> Self {
        BusError::TransportInit(error.to_string())
    }
}

/// Errors reported by a transport implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("message type {0} already exists")]
    AlreadyExists(String),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl From<AdminError> for TransportError {
    fn from(error: AdminError) -> Self {
        match error {
            AdminError::TopicAlreadyExists(topic) => TransportError::AlreadyExists(topic),
            AdminError::Kafka(error) => TransportError::Kafka(error),
            AdminError::Topic { .. } => TransportError::Other(error.to_string()),
        }
    }
}

impl From<RecvErr> for TransportError {
    fn from(error: RecvErr) -> Self {
        match error {
            RecvErr::Kafka(error) => TransportError::Kafka(error),
        }
    }
}

impl From<OffsetErr> for TransportError {
    fn from(error: OffsetErr) -> Self {
        match error {
            OffsetErr::Kafka(error) => TransportError::Kafka(error),
            OffsetErr::NothingReceived => TransportError::Other(error.to_string()),
        }
    }
}

impl From<KafkaProduceError> for TransportError {
    fn from(error: KafkaProduceError) -> Self {
        match error {
            KafkaProduceError::KafkaProduceError { error } => TransportError::Kafka(error),
            KafkaProduceError::KafkaProduceCanceled => TransportError::Other(error.to_string()),
        }
    }
}
