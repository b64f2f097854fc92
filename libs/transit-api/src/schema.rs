use std::future::Future;
use std::pin::Pin;

use crate::error::ClientError;

/// First byte of every schema-framed payload.
pub const WIRE_MAGIC: u8 = 0;

/// Length of the framing header: magic byte + big-endian schema id.
pub const WIRE_HEADER_LEN: usize = 5;

/// Schema registry client.
///
/// Schemas travel as their canonical JSON text; parsing is left to the
/// caller so the contract does not depend on a particular Avro library.
pub trait SchemaRegistry: Send + Sync {
    /// Register `schema` under `subject`. Registering an identical schema
    /// again returns the existing id.
    fn register(
        &self,
        subject: &str,
        schema: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u32, ClientError>> + Send + '_>>;

    /// Fetch a schema by id.
    fn schema(&self, id: u32) -> Pin<Box<dyn Future<Output = Result<String, ClientError>> + Send + '_>>;
}

/// Subject name for a topic's key or value schema.
pub fn subject_name(topic: &str, is_key: bool) -> String {
    if is_key {
        format!("{topic}-key")
    } else {
        format!("{topic}-value")
    }
}

/// Prefix `body` with the magic byte and schema id.
pub fn frame(schema_id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WIRE_HEADER_LEN + body.len());
    out.push(WIRE_MAGIC);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Split a framed payload into (schema id, body).
pub fn unframe(bytes: &[u8]) -> Result<(u32, &[u8]), ClientError> {
    if bytes.len() < WIRE_HEADER_LEN {
        return Err(ClientError::format(format!(
            "framed payload too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != WIRE_MAGIC {
        return Err(ClientError::format(format!("unknown magic byte {}", bytes[0])));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((id, &bytes[WIRE_HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unframe_reads_back_schema_id() {
        let framed = frame(42, b"body");
        assert_eq!(&framed[..5], &[0, 0, 0, 0, 42]);
        let (id, body) = unframe(&framed).unwrap();
        assert_eq!(id, 42);
        assert_eq!(body, b"body");
    }

    #[test]
    fn unframe_rejects_plain_json() {
        assert!(unframe(br#"{"a":1}"#).is_err());
        assert!(unframe(&[0, 1]).is_err());
    }

    #[test]
    fn subjects_follow_topic_name() {
        assert_eq!(subject_name("t", true), "t-key");
        assert_eq!(subject_name("t", false), "t-value");
    }
}
