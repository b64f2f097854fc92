use std::sync::Arc;
use std::time::Duration;

use transit_api::{now_ms, OutboundMessage, ProducerSettings, ProducerTransport};

use crate::codec::PayloadEncoder;
use crate::context::ClientContext;
use crate::error::EngineError;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub topic: String,
    /// Avro schema for keys. Keys are sent as JSON without one.
    pub key_schema: Option<String>,
    /// Avro schema for values. Values are sent as JSON without one.
    pub value_schema: Option<String>,
    pub partitions: i32,
    pub replicas: i32,
}

impl ProducerOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key_schema: None,
            value_schema: None,
            partitions: 1,
            replicas: 1,
        }
    }

    pub fn key_schema(mut self, schema: impl Into<String>) -> Self {
        self.key_schema = Some(schema.into());
        self
    }

    pub fn value_schema(mut self, schema: impl Into<String>) -> Self {
        self.value_schema = Some(schema.into());
        self
    }

    pub fn partitions(mut self, partitions: i32, replicas: i32) -> Self {
        self.partitions = partitions;
        self.replicas = replicas;
        self
    }
}

/// Publishes keyed records to a single topic.
///
/// Construction makes sure the topic exists and registers the schemas.
/// Pending sends are flushed by [`close`](Self::close), or on drop.
pub struct Producer {
    topic: String,
    transport: Arc<dyn ProducerTransport>,
    key: PayloadEncoder,
    value: PayloadEncoder,
    closed: bool,
}

impl Producer {
    pub async fn new(ctx: &ClientContext, options: ProducerOptions) -> Result<Self, EngineError> {
        match ctx
            .topics
            .ensure_exists(&options.topic, options.partitions, options.replicas)
            .await
        {
            Ok(()) => {}
            Err(EngineError::TopicCreation { topic, source }) => {
                tracing::warn!(%topic, error = %source, "topic not created, producer continues");
            }
            Err(e) => return Err(e),
        }

        let key = match &options.key_schema {
            Some(schema) => {
                PayloadEncoder::register(ctx.schema_registry.as_ref(), &options.topic, true, schema).await?
            }
            None => PayloadEncoder::Json,
        };
        let value = match &options.value_schema {
            Some(schema) => {
                PayloadEncoder::register(ctx.schema_registry.as_ref(), &options.topic, false, schema).await?
            }
            None => PayloadEncoder::Json,
        };

        let transport = ctx
            .broker
            .producer(&ProducerSettings {
                bootstrap_servers: ctx.broker_url.clone(),
            })
            .map_err(|e| e.with_context(format!("producer for '{}'", options.topic)))?;

        tracing::info!(
            topic = %options.topic,
            broker = %ctx.broker_url,
            schema_registry = %ctx.schema_registry_url,
            "producer created"
        );

        Ok(Self {
            topic: options.topic,
            transport,
            key,
            value,
            closed: false,
        })
    }

    pub fn publish(&self, key: &serde_json::Value, value: &serde_json::Value) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::ProducerClosed(self.topic.clone()));
        }
        let message = OutboundMessage {
            topic: self.topic.clone(),
            ts_ms: now_ms(),
            key: Some(self.key.encode(key).map_err(|e| e.with_context("key"))?),
            payload: Some(self.value.encode(value).map_err(|e| e.with_context("value"))?),
        };
        self.transport.send(message)?;
        Ok(())
    }

    /// Flush pending sends. Further publishes fail.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.flush(FLUSH_TIMEOUT)?;
        tracing::info!(topic = %self.topic, "producer closed");
        Ok(())
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(topic = %self.topic, error = %e, "failed to flush producer");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use broker_memory::{MemoryBroker, MemorySchemaRegistry};
    use transit_api::{
        Broker, BrokerAdmin, ClientError, ConsumerSettings, ConsumerTransport, NewTopic,
    };

    use super::*;

    /// Admin that lists nothing and refuses every creation, or cannot list at all.
    struct RefusingAdmin {
        unreachable: bool,
    }

    impl BrokerAdmin for RefusingAdmin {
        fn list_topics(
            &self,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ClientError>> + Send + '_>> {
            Box::pin(async move {
                if self.unreachable {
                    Err(ClientError::io("connection refused"))
                } else {
                    Ok(Vec::new())
                }
            })
        }

        fn create_topics(
            &self,
            topics: Vec<NewTopic>,
        ) -> Pin<Box<dyn Future<Output = Vec<(String, Result<(), ClientError>)>> + Send + '_>> {
            Box::pin(async move {
                topics
                    .into_iter()
                    .map(|t| (t.name, Err(ClientError::logic("policy violation"))))
                    .collect()
            })
        }
    }

    /// Memory broker whose topic administration goes through [`RefusingAdmin`].
    struct RefusingBroker {
        inner: MemoryBroker,
        unreachable: bool,
    }

    impl Broker for RefusingBroker {
        fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn ConsumerTransport>, ClientError> {
            self.inner.consumer(settings)
        }

        fn producer(&self, settings: &ProducerSettings) -> Result<Arc<dyn ProducerTransport>, ClientError> {
            self.inner.producer(settings)
        }

        fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ClientError> {
            Ok(Arc::new(RefusingAdmin {
                unreachable: self.unreachable,
            }))
        }
    }

    fn context(broker: MemoryBroker, unreachable: bool) -> ClientContext {
        ClientContext::new(
            Arc::new(RefusingBroker {
                inner: broker,
                unreachable,
            }),
            Arc::new(MemorySchemaRegistry::new()),
            "PLAINTEXT://localhost:9092",
            "http://localhost:8081",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn refused_topic_creation_still_builds_the_producer() {
        let broker = MemoryBroker::new();
        broker.create_topic("stations", 1).unwrap();
        let ctx = context(broker.clone(), false);

        let mut producer = Producer::new(&ctx, ProducerOptions::new("stations")).await.unwrap();

        assert!(!ctx.topics.is_known("stations"));
        producer
            .publish(&serde_json::json!(1), &serde_json::json!({"station_id": 1}))
            .unwrap();
        producer.close().unwrap();
        assert_eq!(broker.messages("stations").len(), 1);
    }

    #[tokio::test]
    async fn failed_metadata_listing_fails_the_producer() {
        let ctx = context(MemoryBroker::new(), true);
        let err = Producer::new(&ctx, ProducerOptions::new("stations")).await.err();
        assert!(matches!(err, Some(EngineError::Client(_))));
    }
}
