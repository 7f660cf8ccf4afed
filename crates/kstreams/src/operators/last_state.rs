use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::message::{self, Message, KEY_FIELD, VALUE_FIELD};
use crate::pipeline::StreamOperator;
use crate::state::KeyValueStore;

/// Last-value-wins fold into storage.
///
/// Stores `message[value_field]` under `message[key_field]` and hands the
/// message on unchanged. Messages without a key pass through untouched.
#[derive(Clone)]
pub struct LastState {
    storage: Arc<dyn KeyValueStore>,
    key_field: String,
    value_field: String,
}

impl LastState {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_fields(storage, KEY_FIELD, VALUE_FIELD)
    }

    pub fn with_fields<K, V>(storage: Arc<dyn KeyValueStore>, key_field: K, value_field: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            storage,
            key_field: key_field.into(),
            value_field: value_field.into(),
        }
    }
}

impl fmt::Debug for LastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastState")
            .field("key_field", &self.key_field)
            .field("value_field", &self.value_field)
            .finish()
    }
}

#[async_trait]
impl StreamOperator for LastState {
    async fn process(&self, message: Message) -> Result<Message> {
        let Some(key) = message::field(&message, &self.key_field).map(message::key_string) else {
            return Ok(message);
        };

        let value = message.get(&self.value_field).cloned().unwrap_or(Value::Null);
        self.storage.set(&key, value).await?;
        Ok(message)
    }

    fn name(&self) -> &str {
        "last_state"
    }
}
