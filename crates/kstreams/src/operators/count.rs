use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::{AggregationError, Result};
use crate::message::{self, Message, KEY_FIELD};
use crate::operators::type_name;
use crate::pipeline::StreamOperator;
use crate::state::KeyValueStore;

/// Running count per key
///
/// Each keyed message increments the stored counter and is replaced by a
/// `{<key_field>: key, <count_field>: n}` record. Messages without a key
/// pass through untouched.
///
/// # Examples
///
/// ```rust,no_run
/// use kstreams::operators::CountByKey;
/// use kstreams::pipeline::StreamOperator;
/// use kstreams::state::MemoryStore;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let counter = CountByKey::new(Arc::new(MemoryStore::new()), "key", "count");
/// let out = counter.process(json!({"key": "if", "value": 1})).await?;
/// assert_eq!(out, json!({"key": "if", "count": 1}));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CountByKey {
    storage: Arc<dyn KeyValueStore>,
    key_field: String,
    count_field: String,
}

impl CountByKey {
    pub fn new<K, C>(storage: Arc<dyn KeyValueStore>, key_field: K, count_field: C) -> Self
    where
        K: Into<String>,
        C: Into<String>,
    {
        Self {
            storage,
            key_field: key_field.into(),
            count_field: count_field.into(),
        }
    }

    pub fn with_defaults(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(storage, KEY_FIELD, "count")
    }
}

impl fmt::Debug for CountByKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountByKey")
            .field("key_field", &self.key_field)
            .field("count_field", &self.count_field)
            .finish()
    }
}

#[async_trait]
impl StreamOperator for CountByKey {
    async fn process(&self, message: Message) -> Result<Message> {
        let Some(key_value) = message::field(&message, &self.key_field).cloned() else {
            return Ok(message);
        };
        let key = message::key_string(&key_value);

        let previous = match self.storage.get(&key).await? {
            None => 0,
            Some(stored) => match stored.as_u64() {
                Some(n) => n,
                None => {
                    return Err(AggregationError::TypeMismatch {
                        key,
                        expected: "unsigned integer".to_string(),
                        actual: type_name(&stored).to_string(),
                    }
                    .into())
                }
            },
        };

        let count = previous + 1;
        self.storage.set(&key, Value::from(count)).await?;
        trace!(key = %key, count, "count updated");

        let mut record = Map::new();
        record.insert(self.key_field.clone(), key_value);
        record.insert(self.count_field.clone(), Value::from(count));
        Ok(Value::Object(record))
    }

    fn name(&self) -> &str {
        "count_by_key"
    }
}
