use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::record::{Message, OutboundMessage, PartitionAssignment};

/// Set of topics a consumer subscribes to.
///
/// A pattern starting with `^` is a regular expression over topic names,
/// anything else names a single topic.
#[derive(Clone)]
pub struct TopicPattern {
    source: String,
    regex: Option<regex::Regex>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, ClientError> {
        if pattern.is_empty() {
            return Err(ClientError::config("topic pattern must not be empty"));
        }
        let regex = if pattern.starts_with('^') {
            Some(regex::Regex::new(pattern)?)
        } else {
            None
        };
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, topic: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(topic),
            None => self.source == topic,
        }
    }

    pub fn is_regex(&self) -> bool {
        self.regex.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Consumer group id derived from the pattern.
    pub fn group_id(&self) -> String {
        format!("{}_group", self.source)
    }
}

impl fmt::Debug for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TopicPattern").field(&self.source).finish()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Where a consumer group starts on a partition without a committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetReset::Earliest => f.write_str("earliest"),
            OffsetReset::Latest => f.write_str("latest"),
        }
    }
}

/// Broker properties for a consumer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
}

/// Broker properties for a producer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    pub bootstrap_servers: String,
}

/// Topic creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replicas: i32,
}

/// Receives partition assignments from the transport.
///
/// Called synchronously from inside the transport (during `poll`) whenever
/// the consumer's partition set changes. Implementations must not block:
/// they only rewrite offsets and return the list that the transport then
/// assigns as a whole.
pub trait RebalanceListener: Send + Sync {
    fn on_assign(&self, partitions: Vec<PartitionAssignment>) -> Vec<PartitionAssignment>;
}

/// Consumer side of a broker connection.
pub trait ConsumerTransport: Send {
    /// Subscribe to every topic matching `pattern`. Assignments are
    /// delivered through `listener` on later polls.
    fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ClientError>;

    /// Wait at most `timeout` for the next message.
    ///
    /// `None` — nothing arrived in time. Returning a message advances the
    /// consumer position past it.
    #[allow(clippy::type_complexity)]
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Message, ClientError>>> + Send + '_>>;

    /// Leave the group and release the connection. Idempotent.
    fn close(&mut self) -> Result<(), ClientError>;
}

/// Producer side of a broker connection.
pub trait ProducerTransport: Send + Sync {
    /// Enqueue a message for delivery. Does not wait for acknowledgement.
    fn send(&self, message: OutboundMessage) -> Result<(), ClientError>;

    /// Wait until every enqueued message is delivered, at most `timeout`.
    fn flush(&self, timeout: Duration) -> Result<(), ClientError>;
}

/// Topic administration.
pub trait BrokerAdmin: Send + Sync {
    /// Names of all topics currently known to the broker.
    fn list_topics(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ClientError>> + Send + '_>>;

    /// Create topics. One result per requested topic, in request order.
    #[allow(clippy::type_complexity)]
    fn create_topics(
        &self,
        topics: Vec<NewTopic>,
    ) -> Pin<Box<dyn Future<Output = Vec<(String, Result<(), ClientError>)>> + Send + '_>>;
}

/// Connection factory for one broker cluster.
pub trait Broker: Send + Sync {
    fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn ConsumerTransport>, ClientError>;

    fn producer(&self, settings: &ProducerSettings) -> Result<Arc<dyn ProducerTransport>, ClientError>;

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_its_topic() {
        let p = TopicPattern::parse("org.chicago.cta.stations").unwrap();
        assert!(!p.is_regex());
        assert!(p.matches("org.chicago.cta.stations"));
        assert!(!p.matches("org.chicago.cta.stations.table.v1"));
    }

    #[test]
    fn caret_pattern_is_a_regex() {
        let p = TopicPattern::parse("^org.chicago.cta.station.arrivals.").unwrap();
        assert!(p.is_regex());
        assert!(p.matches("org.chicago.cta.station.arrivals.clark"));
        assert!(!p.matches("org.chicago.cta.weather"));
    }

    #[test]
    fn group_id_is_derived_from_pattern() {
        let p = TopicPattern::parse("org.chicago.cta.weather").unwrap();
        assert_eq!(p.group_id(), "org.chicago.cta.weather_group");
    }

    #[test]
    fn invalid_regex_is_config_error() {
        let err = TopicPattern::parse("^(unclosed").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Config);
    }
}
