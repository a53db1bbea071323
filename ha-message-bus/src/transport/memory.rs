//! In-process transport. One append-only log per message type, committed
//! offsets per consumer group, and blocking receives woken by a condvar.
//!
//! Besides backing tests it doubles as a single-process bus, which is why it
//! keeps Kafka's semantics where they matter: unacknowledged messages are
//! delivered again to the next receiver of the same group, and `latest`
//! receivers skip whatever was published before they subscribed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::consumer::{ConsumerConfig, OffsetPolicy};
use crate::error::TransportError;
use crate::message::Message;
use crate::transport::{Transport, TransportAdmin, TransportReceiver, TransportSender};

#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    arrivals: Condvar,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    // (consumer group, message type) -> offset of the next message to deliver
    committed: HashMap<(String, String), usize>,
    acked: Vec<Acked>,
    waiting_receivers: usize,
}

#[derive(Default)]
struct Topic {
    partitions: i32,
    log: Vec<String>,
    batches: Vec<Vec<String>>,
}

/// One acknowledgment, as recorded by the memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acked {
    pub consumer_group: String,
    pub message_type: String,
    pub offset: i64,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Other("memory transport lock poisoned".to_string()))
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        match self.shared.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Every message published to `message_type`, in order.
    pub fn messages(&self, message_type: &str) -> Vec<String> {
        self.read(|state| {
            state
                .topics
                .get(message_type)
                .map(|topic| topic.log.clone())
                .unwrap_or_default()
        })
    }

    /// The batches handed to `send` for `message_type`, as they were received.
    pub fn batches(&self, message_type: &str) -> Vec<Vec<String>> {
        self.read(|state| {
            state
                .topics
                .get(message_type)
                .map(|topic| topic.batches.clone())
                .unwrap_or_default()
        })
    }

    pub fn partitions(&self, message_type: &str) -> Option<i32> {
        self.read(|state| state.topics.get(message_type).map(|topic| topic.partitions))
    }

    /// Offsets acknowledged by `consumer_group` on `message_type`, in ack order.
    pub fn acked(&self, consumer_group: &str, message_type: &str) -> Vec<i64> {
        self.read(|state| {
            state
                .acked
                .iter()
                .filter(|ack| ack.consumer_group == consumer_group && ack.message_type == message_type)
                .map(|ack| ack.offset)
                .collect()
        })
    }

    /// Offset of the next message the group would be given after a restart.
    pub fn committed(&self, consumer_group: &str, message_type: &str) -> Option<i64> {
        self.read(|state| {
            state
                .committed
                .get(&(consumer_group.to_string(), message_type.to_string()))
                .map(|offset| *offset as i64)
        })
    }

    /// Receivers currently blocked waiting for a message.
    pub fn waiting_receivers(&self) -> usize {
        self.read(|state| state.waiting_receivers)
    }

    /// Waits until at least `count` receivers are blocked in `receive`.
    pub fn wait_for_receivers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.waiting_receivers() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.waiting_receivers() >= count
    }
}

impl Transport for MemoryTransport {
    fn admin(&self, _admin_id: &str) -> Result<Box<dyn TransportAdmin>, TransportError> {
        Ok(Box::new(MemoryAdmin {
            shared: self.shared.clone(),
        }))
    }

    fn sender(
        &self,
        _producer_id: &str,
        message_type: &str,
    ) -> Result<Box<dyn TransportSender>, TransportError> {
        Ok(Box::new(MemorySender {
            shared: self.shared.clone(),
            message_type: message_type.to_string(),
        }))
    }

    fn receiver(
        &self,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn TransportReceiver>, TransportError> {
        let state = self.shared.lock()?;
        let key = (config.consumer_group.clone(), config.message_type.clone());
        let position = match (state.committed.get(&key), config.offset) {
            (Some(committed), _) => *committed,
            (None, OffsetPolicy::Earliest) => 0,
            (None, OffsetPolicy::Latest) => state
                .topics
                .get(&config.message_type)
                .map_or(0, |topic| topic.log.len()),
        };
        debug!(
            "memory receiver {} for {} starts at offset {}",
            config.consumer_id, config.message_type, position
        );

        Ok(Box::new(MemoryReceiver {
            shared: self.shared.clone(),
            consumer_group: config.consumer_group.clone(),
            message_type: config.message_type.clone(),
            auto_ack: config.auto_ack,
            position,
            last_received: None,
        }))
    }
}

struct MemoryAdmin {
    shared: Arc<Shared>,
}

impl TransportAdmin for MemoryAdmin {
    fn list_message_types(&self) -> Result<HashSet<String>, TransportError> {
        Ok(self.shared.lock()?.topics.keys().cloned().collect())
    }

    fn register_message_types(
        &self,
        message_types: &[&str],
        partitions: i32,
    ) -> Result<(), TransportError> {
        let mut state = self.shared.lock()?;
        if let Some(existing) = message_types
            .iter()
            .find(|message_type| state.topics.contains_key(**message_type))
        {
            return Err(TransportError::AlreadyExists(existing.to_string()));
        }

        for message_type in message_types {
            state.topics.insert(
                message_type.to_string(),
                Topic {
                    partitions,
                    ..Default::default()
                },
            );
        }
        Ok(())
    }

    fn deregister_message_types(&self, message_types: &[&str]) -> Result<(), TransportError> {
        let mut state = self.shared.lock()?;
        for message_type in message_types {
            if state.topics.remove(*message_type).is_none() {
                return Err(TransportError::Other(format!(
                    "unknown message type {}",
                    message_type
                )));
            }
            state
                .committed
                .retain(|(_, committed_type), _| committed_type != message_type);
        }
        Ok(())
    }
}

struct MemorySender {
    shared: Arc<Shared>,
    message_type: String,
}

impl TransportSender for MemorySender {
    fn send(&self, messages: &[String]) -> Result<(), TransportError> {
        let mut state = self.shared.lock()?;
        // Unknown types are created on first use, like a broker with topic auto-creation
        let topic = state
            .topics
            .entry(self.message_type.clone())
            .or_insert_with(|| Topic {
                partitions: 1,
                ..Default::default()
            });
        topic.log.extend(messages.iter().cloned());
        topic.batches.push(messages.to_vec());
        drop(state);

        self.shared.arrivals.notify_all();
        Ok(())
    }
}

struct MemoryReceiver {
    shared: Arc<Shared>,
    consumer_group: String,
    message_type: String,
    auto_ack: bool,
    position: usize,
    last_received: Option<usize>,
}

impl MemoryReceiver {
    fn commit(&self, state: &mut State, offset: usize) {
        state.committed.insert(
            (self.consumer_group.clone(), self.message_type.clone()),
            offset + 1,
        );
    }

    fn next_message(&mut self, state: &mut State) -> Option<Message> {
        let payload = state
            .topics
            .get(&self.message_type)?
            .log
            .get(self.position)?
            .clone();

        let offset = self.position;
        self.last_received = Some(offset);
        self.position += 1;
        if self.auto_ack {
            self.commit(state, offset);
        }

        Some(Message {
            message_type: self.message_type.clone(),
            partition: 0,
            offset: offset as i64,
            payload: payload.into_bytes(),
        })
    }
}

impl TransportReceiver for MemoryReceiver {
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let shared = self.shared.clone();
        let mut state = shared.lock()?;

        loop {
            if let Some(message) = self.next_message(&mut state) {
                return Ok(Some(message));
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            state.waiting_receivers += 1;
            state = match remaining {
                Some(remaining) => shared
                    .arrivals
                    .wait_timeout(state, remaining)
                    .map_err(|_| TransportError::Closed)?
                    .0,
                None => shared
                    .arrivals
                    .wait(state)
                    .map_err(|_| TransportError::Closed)?,
            };
            state.waiting_receivers -= 1;
        }
    }

    fn ack(&mut self) -> Result<(), TransportError> {
        let offset = self
            .last_received
            .ok_or_else(|| TransportError::Other("no message to acknowledge".to_string()))?;

        let mut state = self.shared.lock()?;
        self.commit(&mut state, offset);
        state.acked.push(Acked {
            consumer_group: self.consumer_group.clone(),
            message_type: self.message_type.clone(),
            offset: offset as i64,
        });
        Ok(())
    }
}
