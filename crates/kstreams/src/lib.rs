//! Kafka stream and table DSL
//!
//! This crate builds streaming topologies from chained operators:
//! changelog streams, materialized tables with replay, keyed stateful
//! reducers, termination policies and stream-stream joins. Messaging and
//! storage are reached only through the `MessagingClient` and
//! `KeyValueStore` traits.

pub mod client;
pub mod config;
pub mod dsl;
pub mod error;
pub mod factory;
pub mod message;
pub mod operators;
pub mod pipeline;
pub mod state;

// Re-export commonly used types
pub use dsl::{JoinType, KStream, KTable, StreamDsl, StreamOps, Subscriber};

pub use factory::KafkaStreams;

pub use error::{
    AggregationError, LifecycleError, Result, StateError, StateResult, StreamsError,
};

pub use config::{KafkaConfig, PipelineOptions, StreamsConfig};

pub use message::Message;

pub use client::{
    ClientFactory, ClientStats, EnvelopeType, ErrorCallback, KafkaClient, KafkaClientFactory,
    MemoryClient, MemoryClientFactory, MessagingClient, ProduceRecord, ProduceType,
};

pub use pipeline::{
    ExecutorStats, PredicateFn, Stage, StreamInput, StreamOperator, TerminationPolicy,
    TerminationSignal,
};

pub use operators::{CountByKey, LastState, SumByKey};

pub use state::{KeyValueStore, MemoryStore, MemoryStoreFactory, StorageFactory};
