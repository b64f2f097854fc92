use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;
use base64::Engine;

use transit_api::schema::{frame, subject_name, unframe};
use transit_api::{ClientError, Message, PollError, RawRecord, SchemaRegistry};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Consumer side — wire message → RawRecord
// ---------------------------------------------------------------------------

/// Decodes polled messages.
///
/// Plain decoders read JSON (falling back to UTF-8 text). Schema-checked
/// decoders expect registry framing and resolve writer schemas by id,
/// caching them for the lifetime of the consumer.
pub struct MessageDecoder {
    registry: Option<Arc<dyn SchemaRegistry>>,
    schemas: HashMap<u32, Schema>,
}

impl MessageDecoder {
    pub fn plain() -> Self {
        Self {
            registry: None,
            schemas: HashMap::new(),
        }
    }

    pub fn schema_checked(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry: Some(registry),
            schemas: HashMap::new(),
        }
    }

    pub async fn decode(&mut self, message: Message) -> Result<RawRecord, PollError> {
        let key = match message.key.as_deref() {
            Some(bytes) => Some(self.decode_part(bytes).await.map_err(|e| decode_error(&message, e.with_context("key")))?),
            None => None,
        };
        let value = match message.payload.as_deref() {
            Some(bytes) => Some(self.decode_part(bytes).await.map_err(|e| decode_error(&message, e.with_context("value")))?),
            None => None,
        };
        Ok(RawRecord {
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
            ts_ms: message.ts_ms,
            key,
            value,
        })
    }

    async fn decode_part(&mut self, bytes: &[u8]) -> Result<serde_json::Value, ClientError> {
        let Some(registry) = self.registry.clone() else {
            return decode_plain(bytes);
        };
        let (id, mut body) = unframe(bytes)?;
        if !self.schemas.contains_key(&id) {
            let text = registry.schema(id).await?;
            let schema = Schema::parse_str(&text)
                .map_err(|e| ClientError::schema(format!("schema {id}: {e}")))?;
            self.schemas.insert(id, schema);
        }
        let schema = &self.schemas[&id];
        let avro = apache_avro::from_avro_datum(schema, &mut body, None)
            .map_err(|e| ClientError::format(format!("avro decode: {e}")))?;
        Ok(avro_to_value(&avro))
    }
}

fn decode_error(message: &Message, source: ClientError) -> PollError {
    PollError::Decode {
        topic: message.topic.clone(),
        partition: message.partition,
        offset: message.offset,
        source,
    }
}

fn decode_plain(bytes: &[u8]) -> Result<serde_json::Value, ClientError> {
    match serde_json::from_slice(bytes) {
        Ok(v) => Ok(v),
        Err(_) => Ok(serde_json::Value::String(String::from_utf8(bytes.to_vec())?)),
    }
}

// ---------------------------------------------------------------------------
// Producer side — serde_json::Value → wire bytes
// ---------------------------------------------------------------------------

/// Encodes one half (key or value) of outgoing messages.
pub enum PayloadEncoder {
    /// Registry-framed Avro datum.
    Avro { schema: Schema, schema_id: u32 },
    /// JSON text, no schema.
    Json,
}

impl PayloadEncoder {
    /// Parse `schema`, register it for `topic` and build a framed Avro encoder.
    pub async fn register(
        registry: &dyn SchemaRegistry,
        topic: &str,
        is_key: bool,
        schema: &str,
    ) -> Result<Self, EngineError> {
        let parsed = Schema::parse_str(schema)
            .map_err(|e| EngineError::Codec(format!("invalid schema: {e}")))?;
        let subject = subject_name(topic, is_key);
        let schema_id = registry
            .register(&subject, &parsed.canonical_form())
            .await
            .map_err(|e| e.with_context(format!("register subject '{subject}'")))?;
        tracing::debug!(%subject, schema_id, "registered schema");
        Ok(PayloadEncoder::Avro {
            schema: parsed,
            schema_id,
        })
    }

    pub fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, EngineError> {
        match self {
            PayloadEncoder::Avro { schema, schema_id } => {
                let avro = value_to_avro(value, schema)?;
                let body = apache_avro::to_avro_datum(schema, avro)
                    .map_err(|e| EngineError::Codec(format!("avro encode: {e}")))?;
                Ok(frame(*schema_id, &body))
            }
            PayloadEncoder::Json => serde_json::to_vec(value)
                .map_err(|e| EngineError::Codec(format!("json encode: {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Avro ↔ JSON conversion
// ---------------------------------------------------------------------------

pub(crate) fn avro_to_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::json!(i),
        Value::Long(l) => serde_json::json!(l),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Bytes(b) | Value::Fixed(_, b) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::String(s) | Value::Enum(_, s) => serde_json::Value::String(s.clone()),
        Value::Union(_, inner) => avro_to_value(inner),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(avro_to_value).collect()),
        Value::Map(entries) => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_value(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        Value::Record(fields) => {
            let map: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_value(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        Value::Date(d) | Value::TimeMillis(d) => serde_json::json!(d),
        Value::TimeMicros(t)
        | Value::TimestampMillis(t)
        | Value::TimestampMicros(t)
        | Value::TimestampNanos(t) => serde_json::json!(t),
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

pub(crate) fn value_to_avro(val: &serde_json::Value, schema: &Schema) -> Result<Value, EngineError> {
    match (val, schema) {
        (val, Schema::Union(union_schema)) => {
            for (idx, variant) in union_schema.variants().iter().enumerate() {
                if let Ok(v) = value_to_avro(val, variant) {
                    if v.validate(variant) {
                        return Ok(Value::Union(idx as u32, Box::new(v)));
                    }
                }
            }
            Err(EngineError::Codec(format!("avro: cannot convert {val} to union")))
        }
        (serde_json::Value::Null, _) => Ok(Value::Null),
        (serde_json::Value::Bool(b), _) => Ok(Value::Boolean(*b)),
        (serde_json::Value::Number(n), Schema::Int) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int)
            .ok_or_else(|| EngineError::Codec(format!("avro: {n} is not an int"))),
        (serde_json::Value::Number(n), Schema::Long) => n
            .as_i64()
            .map(Value::Long)
            .ok_or_else(|| EngineError::Codec(format!("avro: {n} is not a long"))),
        (serde_json::Value::Number(n), Schema::Float) => Ok(Value::Float(n.as_f64().unwrap_or(0.0) as f32)),
        (serde_json::Value::Number(n), Schema::Double) => Ok(Value::Double(n.as_f64().unwrap_or(0.0))),
        (serde_json::Value::Number(n), _) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Long(i))
            } else {
                Ok(Value::Double(n.as_f64().unwrap_or(0.0)))
            }
        }
        (serde_json::Value::String(s), _) => Ok(Value::String(s.clone())),
        (serde_json::Value::Array(items), Schema::Array(inner)) => {
            let avro_items: Result<Vec<Value>, EngineError> =
                items.iter().map(|item| value_to_avro(item, &inner.items)).collect();
            Ok(Value::Array(avro_items?))
        }
        (serde_json::Value::Object(map), Schema::Record(record_schema)) => {
            let mut fields = Vec::with_capacity(record_schema.fields.len());
            for field in &record_schema.fields {
                let field_val = map.get(&field.name).unwrap_or(&serde_json::Value::Null);
                let avro_val = value_to_avro(field_val, &field.schema)
                    .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
                fields.push((field.name.clone(), avro_val));
            }
            Ok(Value::Record(fields))
        }
        (val, _) => Err(EngineError::Codec(format!("avro: unsupported value {val}"))),
    }
}
