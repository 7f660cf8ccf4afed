//! Outbound records
//!
//! Emitted messages are turned into [`ProduceRecord`]s before they reach a
//! messaging client. Structured `{key, value}` messages may carry per
//! message overrides for topic, partition, partition key, version and
//! headers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StreamsError};
use crate::message::{self, Message};

/// How an outbound payload is shaped before it is sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProduceType {
    /// Send the payload as-is
    #[default]
    Send,
    /// Send an object payload stamped with `id` and `version`
    Buffer,
    /// Wrap the stamped payload in a typed envelope
    BufferFormat,
}

/// Type suffix of a buffer-formatted envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvelopeType {
    #[default]
    Publish,
    Update,
    Unpublish,
}

impl EnvelopeType {
    pub fn suffix(&self) -> &'static str {
        match self {
            EnvelopeType::Publish => "-published",
            EnvelopeType::Update => "-updated",
            EnvelopeType::Unpublish => "-unpublished",
        }
    }
}

/// A record ready to be handed to a messaging client
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRecord {
    /// Destination topic
    pub topic: String,

    /// Record key
    pub key: Option<String>,

    /// Payload. `Null` produces a tombstone.
    pub value: Message,

    /// Explicit partition
    pub partition: Option<i32>,

    /// Key used only to pick a partition
    pub partition_key: Option<String>,

    /// Record headers
    pub headers: Vec<(String, String)>,

    /// Version stamped by the buffer produce types
    pub version: i64,
}

impl ProduceRecord {
    pub fn new<T: Into<String>>(topic: T, value: Message) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
            partition: None,
            partition_key: None,
            headers: Vec::new(),
            version: 1,
        }
    }

    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_partition_key<K: Into<String>>(mut self, partition_key: K) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Build a record from an emitted message.
    ///
    /// Messages with a `key` and a `value` contribute their value as the
    /// payload and may override the defaults; anything else becomes the
    /// payload unchanged.
    pub fn from_message(message: Message, default_topic: &str, default_version: i64) -> Self {
        let mut record = ProduceRecord::new(default_topic, Value::Null).with_version(default_version);

        if !message::has_kv_structure(&message) {
            record.value = message;
            return record;
        }

        let Value::Object(mut fields) = message else {
            return record;
        };

        if let Some(key) = fields.get("key").filter(|k| !k.is_null()) {
            record.key = Some(message::key_string(key));
        }
        if let Some(Value::String(topic)) = fields.get("topic") {
            if !topic.is_empty() {
                record.topic = topic.clone();
            }
        }
        if let Some(version) = fields.get("version").and_then(Value::as_i64) {
            record.version = version;
        }
        if let Some(partition) = fields.get("partition").and_then(Value::as_i64) {
            record.partition = i32::try_from(partition).ok();
        }
        if let Some(partition_key) = fields.get("partitionKey").filter(|k| !k.is_null()) {
            record.partition_key = Some(message::key_string(partition_key));
        }
        if let Some(headers) = fields.get("headers") {
            record.headers = collect_headers(headers);
        }

        record.value = fields.remove("value").unwrap_or(Value::Null);
        record
    }

    /// Payload bytes as sent on the wire; `None` for a tombstone
    pub fn payload_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.value {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text.clone().into_bytes())),
            other => Ok(Some(serde_json::to_vec(other)?)),
        }
    }

    /// Stamp an object payload with `id` and `version`
    pub fn into_buffer(mut self) -> Result<Self> {
        let identifier = self.identifier();
        let payload = stamp_payload(self.value, &identifier, self.version)?;

        self.value = Value::Object(payload);
        self.key = Some(identifier);
        Ok(self)
    }

    /// Wrap the stamped payload in a `{payload, key, id, time, type}` envelope
    pub fn into_buffer_format(mut self, envelope: EnvelopeType) -> Result<Self> {
        let identifier = self.identifier();
        let payload = stamp_payload(self.value, &identifier, self.version)?;

        let mut wrapped = Map::new();
        wrapped.insert("payload".to_string(), Value::Object(payload));
        wrapped.insert("key".to_string(), Value::String(identifier.clone()));
        wrapped.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        wrapped.insert("time".to_string(), Value::String(Utc::now().to_rfc3339()));
        wrapped.insert(
            "type".to_string(),
            Value::String(format!("{}{}", self.topic, envelope.suffix())),
        );

        self.value = Value::Object(wrapped);
        self.key = Some(identifier);
        Ok(self)
    }

    /// Apply a produce type
    pub fn shaped(self, produce_type: ProduceType) -> Result<Self> {
        match produce_type {
            ProduceType::Send => Ok(self),
            ProduceType::Buffer => self.into_buffer(),
            ProduceType::BufferFormat => self.into_buffer_format(EnvelopeType::Publish),
        }
    }

    fn identifier(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

fn stamp_payload(value: Value, identifier: &str, version: i64) -> Result<Map<String, Value>> {
    let Value::Object(mut payload) = value else {
        return Err(StreamsError::Produce(
            "expecting payload to be of type object".to_string(),
        ));
    };

    payload
        .entry("id")
        .or_insert_with(|| Value::String(identifier.to_string()));
    if version != 0 {
        payload.entry("version").or_insert_with(|| Value::from(version));
    }
    Ok(payload)
}

/// Headers may be given as an object or as an array of single-entry objects
fn collect_headers(headers: &Value) -> Vec<(String, String)> {
    let pairs = |obj: &Map<String, Value>| -> Vec<(String, String)> {
        obj.iter()
            .map(|(k, v)| (k.clone(), message::text_form(v)))
            .collect()
    };

    match headers {
        Value::Object(obj) => pairs(obj),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .flat_map(pairs)
            .collect(),
        _ => Vec::new(),
    }
}
