use std::future::Future;

use ha_message_bus::{BusError, ConfigStore, ConfigStoreError, Producer};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::event::{EventError, EventsFile, HealthEvent, Location};

pub const HA_INDEX: &str = "ha";
pub const MESSAGE_TYPE_KEY: &str = "FAULT_TOLERANCE.message_type";
pub const RESOURCE_TYPES_KEY: &str = "CLUSTER.resource_type";
// Not part of the HA config yet, every cluster runs a single storage set
pub const STORAGESET_ID: &str = "1";

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Config(#[from] ConfigStoreError),
    #[error("config key {0} has an unexpected value: {1}")]
    InvalidConfig(String, Value),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Cluster settings the publisher needs, resolved once from the HA config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    pub message_type: String,
    pub location: Location,
    pub resource_types: Vec<String>,
}

impl ClusterContext {
    pub fn load(store: &dyn ConfigStore) -> Result<Self, PublisherError> {
        let resource_types: Vec<String> = match store.get(HA_INDEX, RESOURCE_TYPES_KEY)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(resource_type) => Ok(resource_type),
                    other => Err(PublisherError::InvalidConfig(
                        RESOURCE_TYPES_KEY.to_string(),
                        other,
                    )),
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(PublisherError::InvalidConfig(
                    RESOURCE_TYPES_KEY.to_string(),
                    other,
                ))
            }
        };

        Ok(Self {
            message_type: text(store, MESSAGE_TYPE_KEY)?,
            location: Location {
                cluster_id: text(store, "COMMON_CONFIG.cluster_id")?,
                site_id: text(store, "COMMON_CONFIG.site_id")?,
                rack_id: text(store, "COMMON_CONFIG.rack_id")?,
                storageset_id: STORAGESET_ID.to_string(),
            },
            resource_types,
        })
    }
}

// Ids are sometimes written as numbers in the config files
fn text(store: &dyn ConfigStore, key: &str) -> Result<String, PublisherError> {
    match store.get(HA_INDEX, key)? {
        Value::String(value) => Ok(value),
        value @ Value::Number(_) => Ok(value.to_string()),
        other => Err(PublisherError::InvalidConfig(key.to_string(), other)),
    }
}

/// Publishes every event of `events` in key order, pausing for the file's
/// delay after each one. Resolving `shutdown` during a pause ends the run
/// early. Returns how many events were published.
pub async fn publish_events(
    producer: &Producer,
    context: &ClusterContext,
    events: &EventsFile,
    shutdown: impl Future<Output = ()>,
) -> Result<usize, PublisherError> {
    let ordered = events.ordered()?;
    let delay = events.delay()?;
    tokio::pin!(shutdown);

    let mut published = 0;
    for (position, spec) in ordered {
        let event = HealthEvent::build(spec, &context.location, &context.resource_types)?;
        info!(
            "Publishing health event {}: {} {} is {}",
            position, event.resource_type, event.resource_id, event.resource_status
        );
        producer.publish(&event)?;
        published += 1;

        if let Some(delay) = delay {
            info!("Sleeping for {} seconds", delay.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("interrupted after publishing {} event(s)", published);
                    return Ok(published);
                }
            }
        }
    }

    Ok(published)
}

#[cfg(test)]
mod tests {
    use ha_message_bus::JsonConfigStore;
    use serde_json::json;

    use super::*;

    #[test]
    fn context_reads_the_ha_index() {
        let mut store = JsonConfigStore::new();
        store.load(
            HA_INDEX,
            json!({
                "FAULT_TOLERANCE": {"message_type": "ha_event_hare"},
                "COMMON_CONFIG": {"cluster_id": "c1", "site_id": 2, "rack_id": "3"},
                "CLUSTER": {"resource_type": ["node", "disk", "cvg"]},
            }),
        );

        let context = ClusterContext::load(&store).unwrap();
        assert_eq!(context.message_type, "ha_event_hare");
        assert_eq!(context.location.site_id, "2");
        assert_eq!(context.location.storageset_id, "1");
        assert_eq!(context.resource_types, vec!["node", "disk", "cvg"]);
    }

    #[test]
    fn context_rejects_malformed_config() {
        let mut store = JsonConfigStore::new();
        store.load(
            HA_INDEX,
            json!({
                "FAULT_TOLERANCE": {"message_type": "ha_event_hare"},
                "COMMON_CONFIG": {"cluster_id": "c1", "site_id": "1", "rack_id": "1"},
                "CLUSTER": {"resource_type": "node"},
            }),
        );
        assert!(matches!(
            ClusterContext::load(&store),
            Err(PublisherError::InvalidConfig(key, _)) if key == RESOURCE_TYPES_KEY
        ));

        let empty = JsonConfigStore::new();
        assert!(matches!(
            ClusterContext::load(&empty),
            Err(PublisherError::Config(ConfigStoreError::IndexNotFound(_)))
        ));
    }
}
