//! Seams between the bus engine and the broker it runs on.
//!
//! `kafka` is the production transport; `memory` keeps everything inside the
//! process and is what the engine's own tests run against.

use std::collections::HashSet;
use std::time::Duration;

use crate::consumer::ConsumerConfig;
use crate::error::TransportError;
use crate::message::Message;

pub mod kafka;
pub mod memory;

pub trait TransportAdmin: Send + Sync {
    fn list_message_types(&self) -> Result<HashSet<String>, TransportError>;

    /// Must fail with `TransportError::AlreadyExists` when a type is already registered.
    fn register_message_types(
        &self,
        message_types: &[&str],
        partitions: i32,
    ) -> Result<(), TransportError>;

    fn deregister_message_types(&self, message_types: &[&str]) -> Result<(), TransportError>;
}

pub trait TransportSender: Send + Sync {
    /// Each element is persisted as an independent message, in order.
    fn send(&self, messages: &[String]) -> Result<(), TransportError>;
}

pub trait TransportReceiver: Send {
    /// Waits up to `timeout` for a message; `None` waits forever.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError>;

    /// Acknowledges the most recently received message.
    fn ack(&mut self) -> Result<(), TransportError>;
}

pub trait Transport: Send + Sync {
    fn admin(&self, admin_id: &str) -> Result<Box<dyn TransportAdmin>, TransportError>;

    fn sender(
        &self,
        producer_id: &str,
        message_type: &str,
    ) -> Result<Box<dyn TransportSender>, TransportError>;

    fn receiver(&self, config: &ConsumerConfig)
        -> Result<Box<dyn TransportReceiver>, TransportError>;
}
