use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;

/// A unit of data received from the bus. The engine never looks inside the
/// payload; interpreting it is up to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// What a handler wants the consumer to do with the message it was given.
///
/// | Outcome     | Acknowledge | Then                               |
/// |-------------|-------------|------------------------------------|
/// | `Processed` | yes         | poll for the next message          |
/// | `Ignored`   | yes         | poll for the next message          |
/// | `Retry`     | no          | hand the same message back again   |
/// | `StopNoAck` | no          | stop, leaving it for redelivery    |
/// | `StopAck`   | yes         | stop                               |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerOutcome {
    Processed,
    Retry,
    Ignored,
    StopNoAck,
    StopAck,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Processed => "processed",
            HandlerOutcome::Retry => "retry",
            HandlerOutcome::Ignored => "ignored",
            HandlerOutcome::StopNoAck => "stop_no_ack",
            HandlerOutcome::StopAck => "stop_ack",
        }
    }

    pub fn acknowledges(&self) -> bool {
        matches!(
            self,
            HandlerOutcome::Processed | HandlerOutcome::Ignored | HandlerOutcome::StopAck
        )
    }

    pub fn stops(&self) -> bool {
        matches!(self, HandlerOutcome::StopNoAck | HandlerOutcome::StopAck)
    }
}

impl fmt::Display for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handlers that produce no outcome get their message retried.
impl From<Option<HandlerOutcome>> for HandlerOutcome {
    fn from(outcome: Option<HandlerOutcome>) -> Self {
        outcome.unwrap_or(HandlerOutcome::Retry)
    }
}

/// Parses the status strings used by existing HA handlers. Anything that is
/// not recognised becomes `Retry`, so parsing never fails.
impl FromStr for HandlerOutcome {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let outcome = match s.trim().to_ascii_lowercase().as_str() {
            "success" | "processed" => HandlerOutcome::Processed,
            "ignored" => HandlerOutcome::Ignored,
            "failed_stop" | "stop_no_ack" => HandlerOutcome::StopNoAck,
            "success_stop" | "stop_ack" => HandlerOutcome::StopAck,
            _ => HandlerOutcome::Retry,
        };
        Ok(outcome)
    }
}

impl From<&str> for HandlerOutcome {
    fn from(status: &str) -> Self {
        status.parse().unwrap_or(HandlerOutcome::Retry)
    }
}
