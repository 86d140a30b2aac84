//! Wire codecs behind formatters.

use bytes::Bytes;
use serde_json::{Map, Value};

/// A rendered, format-independent payload.
pub type Payload = Value;

/// Turns payloads into bytes and back.
pub trait Codec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<Bytes, String>;

    fn decode(&self, bytes: &[u8]) -> Result<Payload, String>;
}

/// `serde_json` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Bytes, String> {
        serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// `serde_yaml` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn encode(&self, payload: &Payload) -> Result<Bytes, String> {
        serde_yaml::to_string(payload)
            .map(Bytes::from)
            .map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload, String> {
        serde_yaml::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Flat `key=value` lines.
///
/// Only object payloads are accepted. String values are written as-is unless
/// they contain a newline; everything else is written as JSON. Decoding yields
/// string values.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn encode(&self, payload: &Payload) -> Result<Bytes, String> {
        let Value::Object(fields) = payload else {
            return Err("text format requires an object payload".to_string());
        };

        let mut out = String::new();
        for (key, value) in fields {
            if key.is_empty() || key.contains('=') || key.contains('\n') {
                return Err(format!("key '{key}' cannot be written as text"));
            }
            out.push_str(key);
            out.push('=');
            match value {
                Value::String(s) if !s.contains('\n') => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
            out.push('\n');
        }
        Ok(Bytes::from(out))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        let mut fields = Map::new();
        for (idx, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {} has no '='", idx + 1))?;
            fields.insert(key.to_string(), Value::String(value.to_string()));
        }
        Ok(Value::Object(fields))
    }
}
