//! Error types for stream and table topologies
//!
//! Errors are grouped by where they originate: lifecycle misuse of a stream
//! handle, storage round-trips made by stateful operators, user supplied
//! stage functions, and the messaging client.

use thiserror::Error;

/// Main error type for stream and table operations
#[derive(Error, Debug)]
pub enum StreamsError {
    /// Invalid or missing configuration
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A stream or table handle was used out of order
    #[error("lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Storage adapter errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Stateful reducer errors
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// A pipeline stage failed while handling a message
    #[error("operator '{operator}' failed: {source}")]
    Operator {
        operator: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Kafka client errors
    #[error("kafka error: {source}")]
    Kafka {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A message could not be turned into an outbound record
    #[error("produce error: {0}")]
    Produce(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl StreamsError {
    /// Wrap a failure raised by a user supplied stage function
    pub fn operator<S, E>(operator: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StreamsError::Operator {
            operator: operator.into(),
            source: source.into(),
        }
    }

    /// Build a configuration error from a message
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        StreamsError::Configuration {
            source: message.into(),
        }
    }
}

/// Misuse of the start/finalise/close lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("{kind} is already started")]
    AlreadyStarted { kind: &'static str },

    #[error("table has already been finalised")]
    AlreadyFinalised,

    #[error("table must be finalised before it can replay")]
    NotFinalised,

    #[error("producer is not yet set up")]
    ProducerNotReady,

    #[error("{kind} is closed")]
    Closed { kind: &'static str },
}

/// Errors raised by the stateful reducers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("type mismatch for key '{key}': expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("numeric overflow while combining values for key '{key}'")]
    Overflow { key: String },
}

/// Storage adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("{backend_type} store is closed")]
    Closed { backend_type: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("storage error in {backend_type}: {details}")]
    StorageError {
        backend_type: String,
        details: String,
    },
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamsError>;

/// Result type alias for storage operations
pub type StateResult<T> = std::result::Result<T, StateError>;

impl From<serde_json::Error> for StreamsError {
    fn from(err: serde_json::Error) -> Self {
        StreamsError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for StreamsError {
    fn from(err: anyhow::Error) -> Self {
        StreamsError::Unexpected(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for StreamsError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        StreamsError::Kafka {
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_display() {
        let err = LifecycleError::AlreadyStarted { kind: "KTable" };
        assert_eq!(err.to_string(), "KTable is already started");

        let err: StreamsError = LifecycleError::AlreadyFinalised.into();
        assert!(err.to_string().contains("already been finalised"));
    }

    #[test]
    fn test_state_error_conversion() {
        let err: StreamsError = StateError::Closed {
            backend_type: "memory".to_string(),
        }
        .into();
        assert!(matches!(err, StreamsError::State(StateError::Closed { .. })));
        assert!(err.to_string().contains("memory store is closed"));
    }

    #[test]
    fn test_operator_error_wraps_anyhow() {
        let err = StreamsError::operator("async_map", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "operator 'async_map' failed: boom");
    }

    #[test]
    fn test_aggregation_error_display() {
        let err = AggregationError::TypeMismatch {
            key: "if".to_string(),
            expected: "number".to_string(),
            actual: "string".to_string(),
        };
        assert!(err.to_string().contains("type mismatch for key 'if'"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: StreamsError = parse.unwrap_err().into();
        assert!(matches!(err, StreamsError::Serialization(_)));
    }
}
