//! Messaging clients
//!
//! Streams consume from and produce to a messaging system only through the
//! [`MessagingClient`] trait:
//! - KafkaClient: rdkafka consumer and producer
//! - MemoryClient: in-process client used by tests and topic-less topologies

pub mod kafka;
pub mod memory;
pub mod produce;

pub use kafka::{KafkaClient, KafkaClientFactory};
pub use memory::{MemoryClient, MemoryClientFactory};
pub use produce::{EnvelopeType, ProduceRecord, ProduceType};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, StreamsError};
use crate::pipeline::StreamInput;

/// Callback receiving transport and produce errors
pub type ErrorCallback = Arc<dyn Fn(&StreamsError) + Send + Sync>;

/// Contract between a stream and its messaging system
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Topic consumed by this client, if any
    fn topic(&self) -> Option<&str>;

    /// Begin consumption, pushing every inbound record into `input`.
    ///
    /// Resolves once the consumer is connected. Later transport failures are
    /// reported through `on_error`; the client does not retry on behalf of
    /// the stream.
    async fn start(&self, input: StreamInput, on_error: ErrorCallback, with_producer: bool) -> Result<()>;

    /// Prepare the output sink for `topic`
    async fn setup_producer(&self, topic: &str, partitions: i32, on_error: ErrorCallback) -> Result<()>;

    /// Send one record
    async fn send(&self, record: ProduceRecord) -> Result<()>;

    /// Shape `record` according to `produce_type`, then send it
    async fn produce(&self, record: ProduceRecord, produce_type: ProduceType) -> Result<()> {
        let record = record.shaped(produce_type)?;
        self.send(record).await
    }

    /// Send a tombstone for `key`
    async fn tombstone(&self, topic: &str, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StreamsError::Produce(
                "tombstones only work on key compacted topics, a key is required".to_string(),
            ));
        }
        self.send(ProduceRecord::new(topic, serde_json::Value::Null).with_key(key))
            .await
    }

    fn stats(&self) -> ClientStats;

    async fn close(&self) -> Result<()>;
}

/// Creates a client per stream
pub trait ClientFactory: Send + Sync {
    fn create(&self, topic: Option<&str>) -> Arc<dyn MessagingClient>;
}

/// Client level statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Consumed topic
    pub in_topic: Option<String>,
    /// Producer topic
    pub out_topic: Option<String>,
    /// Records pushed into the stream
    pub consumed: u64,
    /// Records acknowledged by the producer
    pub produced: u64,
    /// Failed sends
    pub produce_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ClientCounters {
    consumed: AtomicU64,
    produced: AtomicU64,
    produce_errors: AtomicU64,
}

impl ClientCounters {
    pub(crate) fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_produce_error(&self) {
        self.produce_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_topic: Option<String>, out_topic: Option<String>) -> ClientStats {
        ClientStats {
            in_topic,
            out_topic,
            consumed: self.consumed.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            produce_errors: self.produce_errors.load(Ordering::Relaxed),
        }
    }
}
