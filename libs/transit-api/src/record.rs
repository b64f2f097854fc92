use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Milliseconds since Unix epoch. Used as the event key by producers.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Starting position requested for a partition at assignment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Earliest retained record of the partition.
    Beginning,
    /// Left to the transport: committed position, else its reset policy.
    Unspecified,
    /// Explicit position.
    At(i64),
}

/// (topic, partition, offset-or-sentinel) delivered by the transport on (re)balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
}

impl PartitionAssignment {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::Unspecified,
        }
    }
}

impl fmt::Display for PartitionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Wire-level message as handed out by a consumer transport.
/// Key and payload are opaque bytes — decoding is the consumer's job.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub ts_ms: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl Message {
    pub fn id(&self) -> RecordId<'_> {
        RecordId {
            topic: &self.topic,
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Message handed to a producer transport for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub ts_ms: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Decoded record dispatched to handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub ts_ms: i64,
    pub key: Option<serde_json::Value>,
    pub value: Option<serde_json::Value>,
}

impl RawRecord {
    pub fn id(&self) -> RecordId<'_> {
        RecordId {
            topic: &self.topic,
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Identity of a record — `topic[partition]@offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for RecordId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Why a poll produced no record.
#[derive(Debug, Clone)]
pub enum PollError {
    /// Reported by the transport (network hiccup, broker unavailable, ...).
    Transport(ClientError),
    /// The message arrived but its key or value could not be decoded.
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        source: ClientError,
    },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Transport(e) => write!(f, "transport: {e}"),
            PollError::Decode {
                topic,
                partition,
                offset,
                source,
            } => write!(f, "decode {topic}[{partition}]@{offset}: {source}"),
        }
    }
}

impl std::error::Error for PollError {}

/// Outcome of a single bounded poll.
///
/// `None` — nothing arrived within the poll timeout.
pub type PollResult = Option<Result<RawRecord, PollError>>;
