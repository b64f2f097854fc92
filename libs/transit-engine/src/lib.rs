//! Consume, transform and materialize.
//!
//! Consumers run a cooperative [`PollLoop`]: drain the subscribed topics
//! while records keep coming, sleep a fixed interval once they stop. Each
//! record goes through a [`Dispatcher`] that isolates handler failures. The
//! station stream classifies raw stations into a [`MaterializedTable`] whose
//! writes are republished on a changelog topic.

pub mod assignment;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod poll_loop;
pub mod producer;
pub mod stations;
pub mod stream;
pub mod table;
pub mod topic_registry;

pub use assignment::AssignmentPolicy;
pub use bootstrap::Engine;
pub use config::{ConfigParser, TransitConfig};
pub use consumer::{Consumer, ConsumerOptions};
pub use context::ClientContext;
pub use dispatcher::{DispatchOutcome, Dispatcher, LoggingHandler, RecordHandler};
pub use error::{EngineError, HandlerError};
pub use poll_loop::{LoopState, LoopStats, PollLoop, RecordSource};
pub use producer::{Producer, ProducerOptions};
pub use stations::{classify, Line, Station, TransformedStation};
pub use stream::{StationApp, StationStream};
pub use table::{ChangelogSink, MaterializedTable, TableCatalog, TableView};
pub use topic_registry::TopicRegistry;
