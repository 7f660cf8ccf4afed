//! Stream and table DSL
//!
//! This module provides the topology building blocks:
//! - KStream: a changelog stream with branching, joins and merging
//! - KTable: a stream folded into a last-value-wins table with replay
//! - StreamOps: the chaining operators shared by both
//! - JoinEngine: inner, left and outer correlation of two streams

mod chain;
pub mod join;
pub mod kstream;
pub mod ktable;
pub mod ops;
mod runtime;

pub use chain::Subscriber;
pub use join::JoinType;
pub use kstream::KStream;
pub use ktable::KTable;
pub use ops::StreamOps;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{MessagingClient, ProduceType};
use crate::config::PipelineOptions;
use crate::error::{LifecycleError, Result};
use crate::message::Message;
use crate::pipeline::{Inbound, Stage, StatsTracker, StreamInput};
use crate::state::KeyValueStore;
use chain::{Chain, Sinks};
use runtime::{ProducerSink, Runtime};

#[derive(Debug, Clone)]
struct OutputTopic {
    topic: String,
    partitions: i32,
    produce_type: ProduceType,
}

/// State shared by every stream flavour: the stage chain, the sinks, the
/// collaborators and the start/close lifecycle.
pub struct StreamDsl {
    kind: &'static str,
    name: String,
    topic: Option<String>,
    chain: Arc<Chain>,
    sinks: Arc<Sinks>,
    stats: Arc<StatsTracker>,
    client: Arc<dyn MessagingClient>,
    owns_client: bool,
    storage: Arc<dyn KeyValueStore>,
    input: StreamInput,
    source: Option<mpsc::UnboundedReceiver<Inbound>>,
    output: Option<OutputTopic>,
    options: PipelineOptions,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    started: bool,
}

impl StreamDsl {
    pub(crate) fn new(
        kind: &'static str,
        topic: Option<&str>,
        storage: Arc<dyn KeyValueStore>,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        let name = topic.unwrap_or("in-memory").to_string();
        let (input, source) = StreamInput::channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            kind,
            sinks: Arc::new(Sinks::new(name.clone())),
            name,
            topic: topic.map(str::to_string),
            chain: Arc::new(Chain::new()),
            stats: Arc::new(StatsTracker::new()),
            client,
            owns_client: true,
            storage,
            input,
            source: Some(source),
            output: None,
            options: PipelineOptions::default(),
            shutdown,
            task: None,
            started: false,
        }
    }

    pub(crate) fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self.sinks = Arc::new(Sinks::new(self.name.clone()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Share the client without taking responsibility for closing it
    pub(crate) fn borrowing_client(mut self) -> Self {
        self.owns_client = false;
        self
    }

    pub(crate) fn push_stage(&self, stage: Stage) {
        self.chain.push(stage);
    }

    pub(crate) fn chain(&self) -> &Chain {
        &self.chain
    }

    pub(crate) fn sinks(&self) -> &Arc<Sinks> {
        &self.sinks
    }

    pub(crate) fn stats_tracker(&self) -> &StatsTracker {
        &self.stats
    }

    pub(crate) fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Attach the producer sink; ignored once the stream has started
    pub(crate) fn set_output(&mut self, topic: &str, partitions: i32, produce_type: ProduceType) {
        if self.started {
            warn!(
                stream = %self.name,
                topic,
                "output topic set after start is ignored"
            );
            return;
        }
        self.output = Some(OutputTopic {
            topic: topic.to_string(),
            partitions,
            produce_type,
        });
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn output_topic(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.topic.as_str())
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        self.storage.clone()
    }

    pub fn client(&self) -> Arc<dyn MessagingClient> {
        self.client.clone()
    }

    /// Handle pushing messages into this stream's source
    pub fn input(&self) -> StreamInput {
        self.input.clone()
    }

    /// Number of stages in the chain
    pub fn stage_count(&self) -> usize {
        self.chain.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Push a message into the stream as if it had been consumed
    pub fn write_to_stream(&self, message: Message) {
        self.input.send(message);
    }

    /// End the stream's source
    pub fn complete_input(&self) {
        self.input.complete();
    }

    /// Spawn the run loop, then connect the consumer and producer sides.
    ///
    /// Resolves once every configured side reports ready.
    pub(crate) async fn launch(&mut self, replay: Option<mpsc::UnboundedReceiver<Message>>) -> Result<()> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted { kind: self.kind }.into());
        }
        let Some(source) = self.source.take() else {
            return Err(LifecycleError::Closed { kind: self.kind }.into());
        };
        self.started = true;

        let producer = self.output.as_ref().map(|output| ProducerSink {
            client: self.client.clone(),
            topic: output.topic.clone(),
            produce_type: output.produce_type,
            version: self.options.message_version,
        });

        let runtime = Runtime {
            name: self.name.clone(),
            chain: self.chain.clone(),
            sinks: self.sinks.clone(),
            stats: self.stats.clone(),
            source,
            replay,
            producer,
            shutdown: self.shutdown.subscribe(),
        };
        self.task = Some(runtime.spawn());

        let on_error = self.sinks.error_callback();
        let with_producer = self.output.is_some();

        let consumer = {
            let client = self.client.clone();
            let input = self.input.clone();
            let on_error = on_error.clone();
            let has_topic = self.topic.is_some();
            async move {
                if has_topic {
                    client.start(input, on_error, with_producer).await
                } else {
                    Ok(())
                }
            }
        };

        let producer = {
            let client = self.client.clone();
            let output = self.output.clone();
            async move {
                match output {
                    Some(output) => {
                        client
                            .setup_producer(&output.topic, output.partitions, on_error)
                            .await
                    }
                    None => Ok(()),
                }
            }
        };

        tokio::try_join!(consumer, producer)?;
        info!(
            stream = %self.name,
            kind = self.kind,
            output = ?self.output_topic(),
            "stream ready"
        );
        Ok(())
    }

    /// Stop the run loop and close the client if this stream owns it
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.send_replace(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(stream = %self.name, error = %e, "run loop ended abnormally");
            }
        } else {
            self.sinks.complete();
        }

        if self.owns_client {
            self.client.close().await?;
        }
        info!(stream = %self.name, kind = self.kind, "stream closed");
        Ok(())
    }
}

impl Drop for StreamDsl {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
