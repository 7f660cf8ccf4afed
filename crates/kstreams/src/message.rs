//! Message shape helpers
//!
//! A message is an arbitrary JSON value. Keyed operators expect the
//! structured shape `{"key": .., "value": .., ...}`; everything else is
//! treated as an opaque payload.

use serde_json::{Map, Value};

use crate::error::Result;

/// A single element flowing through a pipeline
pub type Message = Value;

/// Default field holding the record key
pub const KEY_FIELD: &str = "key";

/// Default field holding the record value
pub const VALUE_FIELD: &str = "value";

/// Whether the message carries both a `key` and a `value` field
pub fn has_kv_structure(message: &Message) -> bool {
    message
        .as_object()
        .map(|obj| obj.contains_key(KEY_FIELD) && obj.contains_key(VALUE_FIELD))
        .unwrap_or(false)
}

/// Look up a field, treating `null` the same as a missing field
pub fn field<'a>(message: &'a Message, name: &str) -> Option<&'a Value> {
    match message.get(name) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value),
    }
}

/// Storage key for a field value. Strings are used as-is, everything else
/// in its JSON text form.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a `{key, value}` record
pub fn kv<K, V>(key: K, value: V) -> Message
where
    K: Into<Value>,
    V: Into<Value>,
{
    let mut record = Map::new();
    record.insert(KEY_FIELD.to_string(), key.into());
    record.insert(VALUE_FIELD.to_string(), value.into());
    Value::Object(record)
}

/// Split a string message into a `{key, value}` record.
///
/// Non-string messages pass through untouched. A missing part leaves the
/// corresponding field absent.
pub fn string_to_kv(message: Message, delimiter: &str, key_index: usize, value_index: usize) -> Message {
    let text = match message {
        Value::String(text) => text,
        other => return other,
    };

    let parts: Vec<&str> = text.split(delimiter).collect();
    let mut record = Map::new();
    if let Some(key) = parts.get(key_index) {
        record.insert(KEY_FIELD.to_string(), Value::String((*key).to_string()));
    }
    if let Some(value) = parts.get(value_index) {
        record.insert(VALUE_FIELD.to_string(), Value::String((*value).to_string()));
    }
    Value::Object(record)
}

/// Parse a JSON string message, or the string `value` of a record, in place
pub fn json_parse(message: Message) -> Result<Message> {
    match message {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        Value::Object(mut record) => {
            if let Some(Value::String(text)) = record.get(VALUE_FIELD) {
                let parsed: Value = serde_json::from_str(text)?;
                record.insert(VALUE_FIELD.to_string(), parsed);
            }
            Ok(Value::Object(record))
        }
        other => Ok(other),
    }
}

/// Render a non-string message as its JSON text
pub fn stringify(message: Message) -> Message {
    match message {
        Value::String(_) => message,
        other => Value::String(other.to_string()),
    }
}

/// Textual form of a value used when concatenating
pub fn text_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
