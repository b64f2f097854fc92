use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

pub const DEFAULT_BROKER_URL: &str = "PLAINTEXT://localhost:9092";
pub const DEFAULT_SCHEMA_REGISTRY_URL: &str = "http://localhost:8081";

/// Root configuration — parsed from TOML or HCL.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitConfig {
    /// Broker bootstrap address.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Schema registry address.
    #[serde(default = "default_schema_registry_url")]
    pub schema_registry_url: String,

    /// HTTP API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Station stream processor.
    #[serde(default)]
    pub stream: StreamAppConfig,

    /// Generic consumers.
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            schema_registry_url: default_schema_registry_url(),
            api_port: default_api_port(),
            stream: StreamAppConfig::default(),
            consumers: Vec::new(),
        }
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_schema_registry_url() -> String {
    DEFAULT_SCHEMA_REGISTRY_URL.to_string()
}

fn default_api_port() -> u16 {
    9200
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamAppConfig {
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_input_topic")]
    pub input_topic: String,
    #[serde(default = "default_output_topic")]
    pub output_topic: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_one")]
    pub partitions: i32,
    #[serde(default = "default_one")]
    pub replicas: i32,
    #[serde(default = "default_true")]
    pub offset_earliest: bool,
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: f64,
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: f64,
}

impl Default for StreamAppConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            table: default_table(),
            partitions: 1,
            replicas: 1,
            offset_earliest: true,
            sleep_secs: default_sleep_secs(),
            consume_timeout_secs: default_consume_timeout_secs(),
        }
    }
}

fn default_app_id() -> String {
    "stations-stream".to_string()
}

fn default_input_topic() -> String {
    "org.chicago.cta.stations".to_string()
}

fn default_output_topic() -> String {
    "org.chicago.cta.stations.table.v1".to_string()
}

fn default_table() -> String {
    "stations_table".to_string()
}

fn default_one() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_sleep_secs() -> f64 {
    1.0
}

fn default_consume_timeout_secs() -> f64 {
    0.1
}

/// Which built-in handler a generic consumer feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    #[default]
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Topic name, or a regex when it starts with `^`.
    pub pattern: String,
    #[serde(default)]
    pub handler: HandlerKind,
    #[serde(default = "default_true")]
    pub schema_checked: bool,
    #[serde(default)]
    pub offset_earliest: bool,
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: f64,
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: f64,
}

/// Convert a seconds value from config into a `Duration`.
pub fn secs(field: &str, value: f64) -> Result<Duration, EngineError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EngineError::Config(format!(
            "{field} must be a positive number of seconds, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value).map_err(|e| EngineError::Config(format!("{field}: {e}")))
}

/// A configuration format. Selected by file extension.
pub trait ConfigParser: Send + Sync {
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<TransitConfig, EngineError>;
}

pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<TransitConfig, EngineError> {
        TransitConfig::parse(content)
    }
}

impl TransitConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load configuration, picking the parser by file extension.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("toml");
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| EngineError::Config(format!("{path}: no parser for '.{ext}' files")))?;
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        let config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let stream = &self.stream;
        if stream.input_topic == stream.output_topic {
            return Err(EngineError::Config(format!(
                "stream input and output topic are both '{}'",
                stream.input_topic
            )));
        }
        if stream.partitions < 1 || stream.replicas < 1 {
            return Err(EngineError::Config(
                "stream partitions and replicas must be at least 1".into(),
            ));
        }
        secs("stream.sleep_secs", stream.sleep_secs)?;
        secs("stream.consume_timeout_secs", stream.consume_timeout_secs)?;

        for consumer in &self.consumers {
            let ctx = format!("consumer '{}'", consumer.pattern);
            transit_api::TopicPattern::parse(&consumer.pattern)
                .map_err(|e| EngineError::Config(format!("{ctx}: {e}")))?;
            secs("sleep_secs", consumer.sleep_secs).map_err(|e| e.with_context(&ctx))?;
            secs("consume_timeout_secs", consumer.consume_timeout_secs)
                .map_err(|e| e.with_context(&ctx))?;
        }
        Ok(())
    }
}
