use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::BusError;
use crate::transport::TransportSender;

/// Publishes values to one registered message type.
pub struct Producer {
    producer_id: String,
    message_type: String,
    sender: Box<dyn TransportSender>,
}

impl Producer {
    pub(crate) fn new(
        producer_id: &str,
        message_type: &str,
        sender: Box<dyn TransportSender>,
    ) -> Self {
        Self {
            producer_id: producer_id.to_string(),
            message_type: message_type.to_string(),
            sender,
        }
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Publishes `value`, which must serialize to one of:
    /// - a map: sent as a single JSON encoded message, keys sorted
    /// - a string: sent as a single message
    /// - a sequence of strings: every element sent as its own message, in order
    ///
    /// Any other shape fails with `BusError::InvalidPayloadType` and sends nothing.
    pub fn publish<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), BusError> {
        let batch = into_batch(serde_json::to_value(value)?)?;

        debug!(
            "producer {} publishing {} message(s) to {}",
            self.producer_id,
            batch.len(),
            self.message_type
        );
        self.sender.send(&batch)?;

        counter!("ha_bus_messages_published_total", "message_type" => self.message_type.clone())
            .increment(batch.len() as u64);
        Ok(())
    }
}

fn into_batch(value: Value) -> Result<Vec<String>, BusError> {
    match value {
        Value::Object(_) => Ok(vec![serde_json::to_string(&value)?]),
        Value::String(message) => Ok(vec![message]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(message) => Ok(message),
                other => Err(BusError::InvalidPayloadType(format!(
                    "list element {} is not a string",
                    other
                ))),
            })
            .collect(),
        other => Err(BusError::InvalidPayloadType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn maps_become_one_json_message_with_sorted_keys() {
        let batch = into_batch(json!({"resource_id": "disk-1", "node_id": "n1"})).unwrap();
        assert_eq!(batch, vec![r#"{"node_id":"n1","resource_id":"disk-1"}"#]);
    }

    #[test]
    fn strings_and_string_lists_pass_through() {
        assert_eq!(into_batch(json!("raw")).unwrap(), vec!["raw"]);
        assert_eq!(into_batch(json!(["b", "a"])).unwrap(), vec!["b", "a"]);
        assert!(into_batch(json!([])).unwrap().is_empty());
    }

    #[test]
    fn other_shapes_are_rejected() {
        for value in [json!(42), json!(true), json!(null), json!(["ok", 1]), json!([["x"]])] {
            assert!(
                matches!(into_batch(value.clone()), Err(BusError::InvalidPayloadType(_))),
                "{} should be rejected",
                value
            );
        }
    }
}
