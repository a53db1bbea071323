use std::sync::Arc;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;
use once_cell::sync::{Lazy, OnceCell};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config_store::ConfigStore;
use crate::consumer::{Consumer, ConsumerConfig, MessageHandler};
use crate::error::{BusError, TransportError};
use crate::producer::Producer;
use crate::transport::kafka::KafkaTransport;
use crate::transport::Transport;

/// Client id used for topic administration.
pub const ADMIN_ID: &str = "ha_admin";
/// Config index holding the message bus settings.
pub const HA_INDEX: &str = "ha";
pub const ENDPOINTS_KEY: &str = "kafka_config.endpoints";
pub const DEFAULT_PARTITIONS: i32 = 1;

static GLOBAL: Lazy<MessageBus> = Lazy::new(MessageBus::new);

/// Entry point to the message bus: owns the transport and hands out
/// producers and consumers bound to it.
///
/// The transport is installed at most once per `MessageBus`. Most processes
/// use the shared instance from `MessageBus::global()`.
#[derive(Default)]
pub struct MessageBus {
    transport: OnceCell<Arc<dyn Transport>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static MessageBus {
        &GLOBAL
    }

    /// Builds the Kafka transport from the endpoints in the `ha` config index.
    /// Calls after the first successful one do nothing.
    pub fn init(&self, store: &dyn ConfigStore) -> Result<(), BusError> {
        if self.is_initialized() {
            debug!("message bus already initialized");
            return Ok(());
        }

        self.transport.get_or_try_init(|| {
            let endpoints = store.get(HA_INDEX, ENDPOINTS_KEY)?;
            let hosts = parse_endpoints(&endpoints)?;

            let mut config = KafkaConfig::init_from_env()
                .map_err(|err| BusError::TransportInit(format!("invalid kafka config: {}", err)))?;
            config.kafka_hosts = hosts;

            info!("initializing message bus with brokers {}", config.kafka_hosts);
            Ok::<Arc<dyn Transport>, BusError>(Arc::new(KafkaTransport::new(config)))
        })?;
        Ok(())
    }

    /// Installs an already built transport. Returns false, leaving the
    /// current one in place, if the bus was initialized before.
    pub fn init_with_transport(&self, transport: Arc<dyn Transport>) -> bool {
        let installed = self.transport.set(transport).is_ok();
        if !installed {
            debug!("message bus already initialized, keeping the current transport");
        }
        installed
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.get().is_some()
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>, BusError> {
        self.transport.get().ok_or(BusError::NotInitialized)
    }

    /// Registers `message_type` unless the transport already knows it. Losing
    /// a registration race against another process is not an error.
    pub fn register(&self, message_type: &str, partitions: i32) -> Result<(), BusError> {
        let registration_error = |error: TransportError| BusError::Registration {
            message_type: message_type.to_string(),
            error,
        };

        let admin = self.transport()?.admin(ADMIN_ID).map_err(registration_error)?;
        let known = admin.list_message_types().map_err(registration_error)?;
        if known.contains(message_type) {
            debug!("message type {} is already registered", message_type);
            return Ok(());
        }

        match admin.register_message_types(&[message_type], partitions) {
            Ok(()) => {
                info!(
                    "registered message type {} with {} partition(s)",
                    message_type, partitions
                );
                Ok(())
            }
            Err(TransportError::AlreadyExists(_)) => {
                debug!("message type {} was registered concurrently", message_type);
                Ok(())
            }
            Err(error) => Err(registration_error(error)),
        }
    }

    pub fn deregister(&self, message_type: &str) -> Result<(), BusError> {
        let admin = self.transport()?.admin(ADMIN_ID)?;
        if !admin.list_message_types()?.contains(message_type) {
            debug!("message type {} is not registered, nothing to remove", message_type);
            return Ok(());
        }

        admin.deregister_message_types(&[message_type])?;
        info!("deregistered message type {}", message_type);
        Ok(())
    }

    /// Registers `message_type` if needed and returns a producer for it.
    pub fn get_producer(
        &self,
        producer_id: &str,
        message_type: &str,
        partitions: i32,
    ) -> Result<Producer, BusError> {
        self.register(message_type, partitions)?;
        let sender = self.transport()?.sender(producer_id, message_type)?;
        Ok(Producer::new(producer_id, message_type, sender))
    }

    /// Returns an unstarted consumer. The message type is not registered here,
    /// a consumer of a type nobody produces simply never receives anything.
    pub fn get_consumer(
        &self,
        config: ConsumerConfig,
        handler: impl MessageHandler,
    ) -> Result<Consumer, BusError> {
        let transport = self.transport()?.clone();
        Ok(Consumer::new(transport, config, Box::new(handler)))
    }
}

/// Turns the configured endpoints, a string or a list of strings such as
/// `tcp://kafka-0:9092`, into a bootstrap server list.
fn parse_endpoints(endpoints: &Value) -> Result<String, BusError> {
    let entries: Vec<&str> = match endpoints {
        Value::String(endpoint) => vec![endpoint.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    BusError::TransportInit(format!("endpoint {} is not a string", item))
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(BusError::TransportInit(format!(
                "unsupported endpoints value {}",
                other
            )))
        }
    };

    if entries.is_empty() {
        return Err(BusError::TransportInit("no endpoints configured".to_string()));
    }

    let hosts = entries
        .into_iter()
        .map(parse_endpoint)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hosts.join(","))
}

fn parse_endpoint(endpoint: &str) -> Result<&str, BusError> {
    let trimmed = endpoint.trim();
    let address = match trimmed.split_once("://") {
        Some(("tcp", address)) => address,
        Some((scheme, _)) => {
            warn!("unexpected scheme {} in endpoint {}", scheme, endpoint);
            return Err(BusError::TransportInit(format!(
                "unsupported endpoint scheme in {}",
                endpoint
            )));
        }
        None => trimmed,
    };

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(address),
        _ => Err(BusError::TransportInit(format!(
            "endpoint {} is not of the form host:port",
            endpoint
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn endpoints_accept_strings_and_lists() {
        assert_eq!(
            parse_endpoints(&json!("tcp://kafka-0:9092")).unwrap(),
            "kafka-0:9092"
        );
        assert_eq!(
            parse_endpoints(&json!(["tcp://kafka-0:9092", "kafka-1:29092"])).unwrap(),
            "kafka-0:9092,kafka-1:29092"
        );
    }

    #[test]
    fn malformed_endpoints_fail_init() {
        for endpoints in [
            json!([]),
            json!(9092),
            json!(["kafka-0"]),
            json!(["kafka-0:port"]),
            json!([":9092"]),
            json!(["http://kafka-0:9092"]),
            json!(["kafka-0:9092", 1]),
        ] {
            assert!(
                matches!(parse_endpoints(&endpoints), Err(BusError::TransportInit(_))),
                "{} should be rejected",
                endpoints
            );
        }
    }

    #[test]
    fn operations_before_init_fail() {
        let bus = MessageBus::new();

        assert!(!bus.is_initialized());
        assert!(matches!(
            bus.register("health", DEFAULT_PARTITIONS),
            Err(BusError::NotInitialized)
        ));
        assert!(matches!(
            bus.deregister("health"),
            Err(BusError::NotInitialized)
        ));
        assert!(matches!(
            bus.get_producer("p", "health", DEFAULT_PARTITIONS),
            Err(BusError::NotInitialized)
        ));
    }
}
