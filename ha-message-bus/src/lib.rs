pub mod bus;
pub mod config_store;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod transport;

pub use bus::{MessageBus, DEFAULT_PARTITIONS};
pub use config_store::{ConfigStore, ConfigStoreError, JsonConfigStore};
pub use consumer::{handler_fn, Consumer, ConsumerConfig, MessageHandler, OffsetPolicy};
pub use error::{BusError, TransportError};
pub use message::{HandlerOutcome, Message};
pub use producer::Producer;
pub use transport::kafka::KafkaTransport;
pub use transport::memory::MemoryTransport;
