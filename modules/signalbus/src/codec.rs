//! Wire codecs.
//!
//! A codec turns a JSON value tree into bytes and back. The bus always hands
//! codecs a serialized [`Metadata`]; what the bytes look like is up to the codec.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::metadata::Metadata;

pub const JSON: &str = "json";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{codec} codec: {message}")]
    Custom { codec: String, message: String },
}

pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize an envelope with `codec`.
pub fn marshal(codec: &dyn Codec, metadata: &Metadata) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(metadata)?;
    codec.encode(&value)
}

/// Decode an envelope with `codec`. Zero bytes decode to the empty envelope.
pub fn unmarshal(codec: &dyn Codec, bytes: &[u8]) -> Result<Metadata, CodecError> {
    if bytes.is_empty() {
        return Ok(Metadata::default());
    }
    let value = codec.decode(bytes)?;
    Ok(serde_json::from_value(value)?)
}

/// Named codecs. Starts with [`JSON`] registered.
#[derive(Clone)]
pub struct Codecs {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl Codecs {
    pub fn new() -> Self {
        let mut codecs: HashMap<String, Arc<dyn Codec>> = HashMap::new();
        codecs.insert(JSON.to_string(), Arc::new(JsonCodec));
        Self { codecs }
    }

    /// Returns `false` when `name` was taken and `override_existing` is off.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        codec: Arc<dyn Codec>,
        override_existing: bool,
    ) -> bool {
        let name = name.into();
        if !override_existing && self.codecs.contains_key(&name) {
            return false;
        }
        self.codecs.insert(name, codec);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new()
    }
}
