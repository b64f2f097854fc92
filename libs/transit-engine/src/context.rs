use std::sync::Arc;

use transit_api::{Broker, SchemaRegistry};

use crate::error::EngineError;
use crate::topic_registry::TopicRegistry;

/// Everything consumers and producers of one process share: the broker
/// connection factory, the schema registry client and the topic registry.
#[derive(Clone)]
pub struct ClientContext {
    pub broker: Arc<dyn Broker>,
    pub schema_registry: Arc<dyn SchemaRegistry>,
    pub topics: TopicRegistry,
    pub broker_url: String,
    pub schema_registry_url: String,
}

impl ClientContext {
    pub fn new(
        broker: Arc<dyn Broker>,
        schema_registry: Arc<dyn SchemaRegistry>,
        broker_url: impl Into<String>,
        schema_registry_url: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let admin = broker.admin().map_err(|e| e.with_context("broker admin"))?;
        Ok(Self {
            broker,
            schema_registry,
            topics: TopicRegistry::new(admin),
            broker_url: broker_url.into(),
            schema_registry_url: schema_registry_url.into(),
        })
    }
}
