use std::collections::HashSet;
use std::time::Duration;

use futures::executor::block_on;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KafkaConfig;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("topic {0} already exists")]
    TopicAlreadyExists(String),
    #[error("operation on topic {topic} failed: {code}")]
    Topic {
        topic: String,
        code: RDKafkaErrorCode,
    },
}

/// Topic management for the message bus, blocking on every admin request.
pub struct TopicAdmin {
    client: AdminClient<DefaultClientContext>,
    timeout: Duration,
    replication_factor: i32,
}

impl TopicAdmin {
    pub fn new(config: &KafkaConfig, client_id: &str) -> Result<Self, KafkaError> {
        let client: AdminClient<DefaultClientContext> = config
            .client_config()
            .set("client.id", client_id)
            .create()?;

        Ok(Self {
            client,
            timeout: config.admin_timeout(),
            replication_factor: config.kafka_replication_factor,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)))
    }

    pub fn list_topics(&self) -> Result<HashSet<String>, AdminError> {
        let metadata = self
            .client
            .inner()
            .fetch_metadata(None, Timeout::After(self.timeout))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect())
    }

    pub fn create_topics(&self, topics: &[&str], partitions: i32) -> Result<(), AdminError> {
        let new_topics: Vec<NewTopic> = topics
            .iter()
            .map(|topic| {
                NewTopic::new(
                    topic,
                    partitions,
                    TopicReplication::Fixed(self.replication_factor),
                )
            })
            .collect();

        let results = block_on(self.client.create_topics(&new_topics, &self.options()))?;
        for topic in check_results(results)? {
            info!("created topic {} with {} partitions", topic, partitions);
        }
        Ok(())
    }

    pub fn delete_topics(&self, topics: &[&str]) -> Result<(), AdminError> {
        let results = block_on(self.client.delete_topics(topics, &self.options()))?;
        for topic in check_results(results)? {
            info!("deleted topic {}", topic);
        }
        Ok(())
    }
}

// Returns the topics that succeeded, or the first failure.
fn check_results(results: Vec<TopicResult>) -> Result<Vec<String>, AdminError> {
    let mut done = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(topic) => done.push(topic),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!("topic {} already exists", topic);
                return Err(AdminError::TopicAlreadyExists(topic));
            }
            Err((topic, code)) => return Err(AdminError::Topic { topic, code }),
        }
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_is_reported_separately() {
        let results = vec![
            Ok("first".to_string()),
            Err(("second".to_string(), RDKafkaErrorCode::TopicAlreadyExists)),
        ];

        match check_results(results) {
            Err(AdminError::TopicAlreadyExists(topic)) => assert_eq!(topic, "second"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn other_failures_carry_the_error_code() {
        let results = vec![Err((
            "health_events".to_string(),
            RDKafkaErrorCode::InvalidPartitions,
        ))];

        match check_results(results) {
            Err(AdminError::Topic { topic, code }) => {
                assert_eq!(topic, "health_events");
                assert_eq!(code, RDKafkaErrorCode::InvalidPartitions);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn successes_are_returned_in_order() {
        let results = vec![Ok("a".to_string()), Ok("b".to_string())];
        assert_eq!(check_results(results).unwrap(), vec!["a", "b"]);
    }
}
