use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::{AggregationError, Result};
use crate::message::{self, Message, KEY_FIELD, VALUE_FIELD};
use crate::operators::type_name;
use crate::pipeline::StreamOperator;
use crate::state::KeyValueStore;

/// Running sum per key
///
/// The stored value decides how an update is combined: a stored number is
/// added to the incoming value (numeric strings included), a stored string
/// gets the incoming value appended. A key seen for the first time starts
/// at `0` when its first value is numeric and at `""` otherwise.
#[derive(Clone)]
pub struct SumByKey {
    storage: Arc<dyn KeyValueStore>,
    key_field: String,
    value_field: String,
    sum_field: String,
}

impl SumByKey {
    pub fn new<K, V, S>(storage: Arc<dyn KeyValueStore>, key_field: K, value_field: V, sum_field: S) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        S: Into<String>,
    {
        Self {
            storage,
            key_field: key_field.into(),
            value_field: value_field.into(),
            sum_field: sum_field.into(),
        }
    }

    pub fn with_defaults(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(storage, KEY_FIELD, VALUE_FIELD, "sum")
    }
}

impl fmt::Debug for SumByKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumByKey")
            .field("key_field", &self.key_field)
            .field("value_field", &self.value_field)
            .field("sum_field", &self.sum_field)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    Int(i64),
    Float(f64),
}

impl Operand {
    fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Operand::Int)
                .or_else(|| n.as_f64().map(Operand::Float)),
            Value::String(s) => {
                let text = s.trim();
                if text.is_empty() {
                    None
                } else if let Ok(i) = text.parse::<i64>() {
                    Some(Operand::Int(i))
                } else {
                    text.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Operand::Float)
                }
            }
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Operand::Int(i) => i as f64,
            Operand::Float(f) => f,
        }
    }

    fn add(self, other: Operand) -> Option<Value> {
        if let (Operand::Int(a), Operand::Int(b)) = (self, other) {
            if let Some(sum) = a.checked_add(b) {
                return Some(Value::from(sum));
            }
        }
        Number::from_f64(self.as_f64() + other.as_f64()).map(Value::Number)
    }
}

fn combine(key: &str, stored: Value, incoming: &Value) -> Result<Value> {
    match stored {
        Value::Number(ref n) => {
            let current = Operand::parse(&stored).ok_or_else(|| AggregationError::TypeMismatch {
                key: key.to_string(),
                expected: "number".to_string(),
                actual: n.to_string(),
            })?;
            let update = Operand::parse(incoming).ok_or_else(|| AggregationError::TypeMismatch {
                key: key.to_string(),
                expected: "number".to_string(),
                actual: type_name(incoming).to_string(),
            })?;
            Ok(current
                .add(update)
                .ok_or_else(|| AggregationError::Overflow { key: key.to_string() })?)
        }
        Value::String(mut text) => {
            text.push_str(&message::text_form(incoming));
            Ok(Value::String(text))
        }
        other => Err(AggregationError::TypeMismatch {
            key: key.to_string(),
            expected: "number or string".to_string(),
            actual: type_name(&other).to_string(),
        }
        .into()),
    }
}

#[async_trait]
impl StreamOperator for SumByKey {
    async fn process(&self, message: Message) -> Result<Message> {
        let Some(key_value) = message::field(&message, &self.key_field).cloned() else {
            return Ok(message);
        };
        let Some(incoming) = message.get(&self.value_field) else {
            return Ok(message);
        };
        let key = message::key_string(&key_value);

        let stored = match self.storage.get(&key).await? {
            Some(stored) => stored,
            None if Operand::parse(incoming).is_some() => Value::from(0),
            None => Value::String(String::new()),
        };

        if stored.is_number() && Operand::parse(incoming).is_none() {
            warn!(
                key = %key,
                value = %incoming,
                "non-numeric value for a numeric sum passed through"
            );
            return Ok(message);
        }

        let sum = combine(&key, stored, incoming)?;
        self.storage.set(&key, sum.clone()).await?;
        trace!(key = %key, "sum updated");

        let mut record = Map::new();
        record.insert(self.key_field.clone(), key_value);
        record.insert(self.sum_field.clone(), sum);
        Ok(Value::Object(record))
    }

    fn name(&self) -> &str {
        "sum_by_key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamsError;
    use crate::state::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_combine_numeric_strings_add() {
        assert_eq!(combine("k", json!(1), &json!("2")).unwrap(), json!(3));
        assert_eq!(combine("k", json!(1.5), &json!(2)).unwrap(), json!(3.5));
    }

    #[test]
    fn test_combine_stored_string_concatenates() {
        // numeric strings concatenate once the stored value is a string
        assert_eq!(combine("k", json!("1"), &json!("2")).unwrap(), json!("12"));
        assert_eq!(combine("k", json!("a,"), &json!(5)).unwrap(), json!("a,5"));
    }

    #[test]
    fn test_combine_rejects_text_into_number() {
        let err = combine("k", json!(1), &json!("eins")).unwrap_err();
        assert!(matches!(err, StreamsError::Aggregation(AggregationError::TypeMismatch { .. })));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let out = combine("k", json!(i64::MAX), &json!(1)).unwrap();
        assert!(out.as_f64().is_some());
        assert!(out.as_i64().is_none());
    }

    #[tokio::test]
    async fn test_sum_by_key() {
        let store = Arc::new(MemoryStore::new());
        let op = SumByKey::with_defaults(store.clone());

        let inputs = [
            ("abc", "1"),
            ("fus", "eins,"),
            ("abc", "3"),
            ("fus", "zwei"),
            ("ida", "0"),
        ];
        let mut last = Value::Null;
        for (key, value) in inputs {
            last = op.process(json!({"key": key, "value": value})).await.unwrap();
        }

        assert_eq!(last, json!({"key": "ida", "sum": 0}));
        assert_eq!(store.get("abc").await.unwrap(), Some(json!(4)));
        assert_eq!(store.get("fus").await.unwrap(), Some(json!("eins,zwei")));
    }

    #[tokio::test]
    async fn test_text_into_numeric_sum_passes_through() {
        let store = Arc::new(MemoryStore::new());
        let op = SumByKey::with_defaults(store.clone());

        op.process(json!({"key": "abc", "value": "1"})).await.unwrap();
        let out = op.process(json!({"key": "abc", "value": "x"})).await.unwrap();
        assert_eq!(out, json!({"key": "abc", "value": "x"}));

        let out = op.process(json!({"key": "abc", "value": "2"})).await.unwrap();
        assert_eq!(out, json!({"key": "abc", "sum": 3}));
        assert_eq!(store.get("abc").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_missing_value_passes_through() {
        let store = Arc::new(MemoryStore::new());
        let op = SumByKey::with_defaults(store.clone());

        let out = op.process(json!({"key": "abc"})).await.unwrap();
        assert_eq!(out, json!({"key": "abc"}));
        assert!(store.is_empty().await.unwrap());
    }
}
