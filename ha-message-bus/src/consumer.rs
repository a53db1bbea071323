use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::message::{HandlerOutcome, Message};
use crate::transport::{Transport, TransportReceiver};

/// Poll timeout used while flushing leftover messages after a stop.
pub const DRAIN_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetPolicy {
    #[default]
    Earliest,
    Latest,
}

impl OffsetPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Earliest => "earliest",
            OffsetPolicy::Latest => "latest",
        }
    }
}

/// Subscription parameters of a consumer. A started consumer never changes
/// them; subscribing differently means building a new consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub consumer_id: String,
    pub consumer_group: String,
    pub message_type: String,
    pub auto_ack: bool,
    pub offset: OffsetPolicy,
    /// How long one poll waits for a message. Zero waits forever.
    pub receive_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(
        consumer_id: impl Into<String>,
        consumer_group: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            consumer_group: consumer_group.into(),
            message_type: message_type.into(),
            auto_ack: false,
            offset: OffsetPolicy::Earliest,
            receive_timeout: Duration::ZERO,
        }
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_offset(mut self, offset: OffsetPolicy) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// The timeout handed to the transport, `None` meaning block until a message arrives.
    pub fn poll_timeout(&self) -> Option<Duration> {
        (!self.receive_timeout.is_zero()).then_some(self.receive_timeout)
    }
}

/// Processes messages delivered to a consumer.
///
/// Returning an error, or panicking, is treated like `HandlerOutcome::Retry`:
/// the same message is handed back on the next iteration.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, message: &Message) -> anyhow::Result<HandlerOutcome>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message) -> anyhow::Result<HandlerOutcome> + Send + 'static,
{
    fn handle(&mut self, message: &Message) -> anyhow::Result<HandlerOutcome> {
        self(message)
    }
}

/// Pins down the signature of a closure so it can be used as a handler
/// without annotating its argument and return types.
pub fn handler_fn<F>(f: F) -> F
where
    F: FnMut(&Message) -> anyhow::Result<HandlerOutcome> + Send + 'static,
{
    f
}

/// Runs a handler over one message type on a dedicated background thread.
///
/// ```ignore
/// let mut consumer = bus.get_consumer(config, handler_fn(|message| {
///     info!("got {:?}", message.payload_str());
///     Ok(HandlerOutcome::Processed)
/// }))?;
/// consumer.start()?;
/// // ...
/// consumer.stop(true);
/// consumer.join();
/// ```
pub struct Consumer {
    config: ConsumerConfig,
    name: String,
    transport: Arc<dyn Transport>,
    handler: Option<Box<dyn MessageHandler>>,
    stop: Arc<AtomicBool>,
    flush_on_exit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Consumer {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: ConsumerConfig,
        handler: Box<dyn MessageHandler>,
    ) -> Self {
        let name = format!("{}-consumer-thread", config.message_type);
        Self {
            config,
            name,
            transport,
            handler: Some(handler),
            stop: Arc::new(AtomicBool::new(false)),
            flush_on_exit: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Name of the worker thread, `<message_type>-consumer-thread`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes and spawns the worker. A consumer can only be started once.
    pub fn start(&mut self) -> Result<(), BusError> {
        let Some(handler) = self.handler.take() else {
            return Err(BusError::AlreadyStarted(self.name.clone()));
        };

        info!("Starting the daemon for {}...", self.name);
        let receiver = match self.transport.receiver(&self.config) {
            Ok(receiver) => receiver,
            Err(err) => {
                // Nothing was spawned, so the consumer can be started again
                self.handler = Some(handler);
                return Err(err.into());
            }
        };

        let worker = Worker {
            name: self.name.clone(),
            message_type: self.config.message_type.clone(),
            poll_timeout: self.config.poll_timeout(),
            receiver,
            handler,
            stop: self.stop.clone(),
            flush_on_exit: self.flush_on_exit.clone(),
        };

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run())
            .map_err(BusError::Spawn)?;
        self.worker = Some(handle);

        info!("The daemon {} started successfully.", self.name);
        Ok(())
    }

    /// Asks the worker to stop before its next poll. An in-flight poll or
    /// handler call is never interrupted. With `flush`, the worker acknowledges
    /// and discards whatever is still deliverable before exiting.
    pub fn stop(&self, flush: bool) {
        info!("Stopping the daemon {}...", self.name);
        // The worker reads the flush flag after it has seen the stop flag
        if flush {
            self.flush_on_exit.store(true, Ordering::SeqCst);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Blocks until the worker exited. Returns immediately if it never started.
    pub fn join(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        info!("waiting for {} to exit...", self.name);
        match handle.join() {
            Ok(()) => info!("The daemon {} is stopped successfully.", self.name),
            Err(panic) => error!(
                "The daemon {} exited with a panic: {}",
                self.name,
                panic_message(panic.as_ref())
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Don't join on drop, a handler that never returns would hang the caller
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// What the loop does after handling a message.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    /// Poll the transport for a new message.
    Poll,
    /// Hand the same message to the handler again, without polling.
    Retry,
    Stop,
}

struct Worker {
    name: String,
    message_type: String,
    poll_timeout: Option<Duration>,
    receiver: Box<dyn TransportReceiver>,
    handler: Box<dyn MessageHandler>,
    stop: Arc<AtomicBool>,
    flush_on_exit: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        let mut pending: Option<Message> = None;

        while !self.stop.load(Ordering::SeqCst) {
            let message = match pending.take() {
                Some(message) => message,
                None => match self.poll() {
                    Some(message) => message,
                    None => continue,
                },
            };

            match self.handle(&message) {
                Next::Poll => {}
                Next::Retry => pending = Some(message),
                Next::Stop => break,
            }
        }

        if self.flush_on_exit.load(Ordering::SeqCst) {
            self.drain();
        }
        debug!("{} left its consume loop", self.name);
    }

    fn poll(&mut self) -> Option<Message> {
        match self.receiver.receive(self.poll_timeout) {
            Ok(Some(message)) => {
                counter!("ha_bus_messages_received_total", "message_type" => self.message_type.clone())
                    .increment(1);
                Some(message)
            }
            // Timeouts are expected, just wait again
            Ok(None) => None,
            Err(err) => {
                counter!("ha_bus_transport_errors_total", "message_type" => self.message_type.clone())
                    .increment(1);
                error!("Suppressing error from message bus: {}", err);
                None
            }
        }
    }

    fn handle(&mut self, message: &Message) -> Next {
        let handler = &mut self.handler;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                counter!("ha_bus_handler_errors_total", "message_type" => self.message_type.clone())
                    .increment(1);
                error!("Caught error from handler: {:#}. retry again ...", err);
                return Next::Retry;
            }
            Err(panic) => {
                counter!("ha_bus_handler_errors_total", "message_type" => self.message_type.clone())
                    .increment(1);
                error!(
                    "Caught panic from handler: {}. retry again ...",
                    panic_message(panic.as_ref())
                );
                return Next::Retry;
            }
        };

        counter!(
            "ha_bus_handler_outcomes_total",
            "message_type" => self.message_type.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        if outcome == HandlerOutcome::Retry {
            return Next::Retry;
        }
        if !outcome.acknowledges() {
            warn!(
                "handler of {} stopped without acknowledging offset {}",
                self.message_type, message.offset
            );
            return Next::Stop;
        }

        // A failed ack is handled like any other transport failure: keep polling
        if !self.ack() {
            return Next::Poll;
        }
        if outcome.stops() {
            info!("handler of {} asked to stop listening", self.message_type);
            return Next::Stop;
        }
        Next::Poll
    }

    fn ack(&mut self) -> bool {
        match self.receiver.ack() {
            Ok(()) => {
                counter!("ha_bus_messages_acked_total", "message_type" => self.message_type.clone())
                    .increment(1);
                true
            }
            Err(err) => {
                counter!("ha_bus_transport_errors_total", "message_type" => self.message_type.clone())
                    .increment(1);
                error!("Suppressing error from message bus on ack: {}", err);
                false
            }
        }
    }

    // Discards everything still deliverable, so the next consumer of this
    // group does not start on stale messages.
    fn drain(&mut self) {
        info!("flush pending messages of type {}.", self.message_type);
        loop {
            match self.receiver.receive(Some(DRAIN_RECEIVE_TIMEOUT)) {
                Ok(Some(message)) => {
                    info!(
                        "flushing message: {} at offset {}.",
                        self.message_type, message.offset
                    );
                    match self.receiver.ack() {
                        Ok(()) => {
                            counter!("ha_bus_messages_drained_total", "message_type" => self.message_type.clone())
                                .increment(1)
                        }
                        Err(err) => error!("failed to ack flushed message: {}", err),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!("stopping flush of {} early: {}", self.message_type, err);
                    break;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_blocks_forever() {
        let config = ConsumerConfig::new("1", "ha", "health");
        assert_eq!(config.poll_timeout(), None);

        let config = config.with_receive_timeout(Duration::from_millis(250));
        assert_eq!(config.poll_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn defaults_match_the_facade() {
        let config = ConsumerConfig::new("1", "ha", "health");
        assert!(!config.auto_ack);
        assert_eq!(config.offset, OffsetPolicy::Earliest);
        assert_eq!(config.offset.as_str(), "earliest");
        assert_eq!(OffsetPolicy::Latest.as_str(), "latest");
    }

    #[test]
    fn panic_payloads_are_readable() {
        let text: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(text.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
