//! Contracts between the transit pipeline and its external collaborators:
//! the broker client, topic administration and the schema registry.

pub mod error;
pub mod record;
pub mod schema;
pub mod transport;

pub use error::{ClientError, ErrorKind};
pub use record::{
    now_ms, Message, Offset, OutboundMessage, PartitionAssignment, PollError, PollResult,
    RawRecord, RecordId,
};
pub use schema::SchemaRegistry;
pub use transport::{
    Broker, BrokerAdmin, ConsumerSettings, ConsumerTransport, NewTopic, OffsetReset,
    ProducerSettings, ProducerTransport, RebalanceListener, TopicPattern,
};
