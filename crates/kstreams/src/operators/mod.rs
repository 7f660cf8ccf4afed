//! Stateful operators
//!
//! Reducers that read-modify-write a `KeyValueStore` per message. They run
//! as asynchronous stages so that a downstream `take` only observes a
//! message after its storage write completed.

pub mod count;
pub mod last_state;
pub mod sum;

pub use count::CountByKey;
pub use last_state::LastState;
pub use sum::SumByKey;

use serde_json::Value;

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
