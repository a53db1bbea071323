use crate::config::KafkaConfig;

use futures::executor::block_on;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{debug, error, info};

pub struct KafkaContext;

impl rdkafka::ClientContext for KafkaContext {}

pub fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = config.client_config();
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(KafkaContext)?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, Timeout::After(config.admin_timeout()))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Enqueues every payload as its own record, then blocks until the brokers
/// acknowledged each of them. Results are returned in the passed-in order.
pub fn send_batch_blocking<C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    payloads: &[String],
) -> Vec<Result<(), KafkaProduceError>> {
    let mut handles = Vec::with_capacity(payloads.len());

    // Enqueue everything first, then wait on each broker ACK
    for payload in payloads {
        let record: FutureRecord<'_, (), String> = FutureRecord::to(topic).payload(payload);
        handles.push(
            kafka_producer
                .send_result(record)
                .map_err(|(error, _)| KafkaProduceError::KafkaProduceError { error }),
        );
    }

    handles
        .into_iter()
        .map(|handle| match block_on(handle?) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError { error }),
            Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
        })
        .collect()
}
