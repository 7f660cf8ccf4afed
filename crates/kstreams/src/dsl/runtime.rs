//! Per-stream run loop
//!
//! One task per started stream. It takes a single message from the input
//! channel (or the replay channel) and drives it through every stage before
//! taking the next one, so asynchronous stages apply backpressure to the
//! whole stream.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::chain::{Chain, Sinks};
use crate::client::{MessagingClient, ProduceRecord, ProduceType};
use crate::error::{Result, StreamsError};
use crate::message::Message;
use crate::pipeline::{execute, Inbound, StatsTracker, TerminationSignal};

/// Terminal producer sink attached by `to(topic)`
pub(crate) struct ProducerSink {
    pub client: Arc<dyn MessagingClient>,
    pub topic: String,
    pub produce_type: ProduceType,
    pub version: i64,
}

enum Flow {
    Continue,
    ConsumerDone,
    StreamDone,
}

pub(crate) struct Runtime {
    pub name: String,
    pub chain: Arc<Chain>,
    pub sinks: Arc<Sinks>,
    pub stats: Arc<StatsTracker>,
    pub source: mpsc::UnboundedReceiver<Inbound>,
    pub replay: Option<mpsc::UnboundedReceiver<Message>>,
    pub producer: Option<ProducerSink>,
    pub shutdown: watch::Receiver<bool>,
}

impl Runtime {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(stream = %self.name, "stream started");
        let mut consuming = true;
        let mut chain_changes = self.chain.changes();

        loop {
            let (head_signals, mut watched) = self.chain.signals();
            if consuming {
                watched.extend(head_signals);
            }

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!(stream = %self.name, "shutdown requested");
                    break;
                }

                // re-read the watched signals after stages were added
                Ok(()) = chain_changes.changed() => {}

                _ = any_fired(watched) => {
                    let (head_signals, tail_signals) = self.chain.signals();
                    if tail_signals.iter().any(TerminationSignal::is_fired) {
                        break;
                    }
                    if consuming && head_signals.iter().any(TerminationSignal::is_fired) {
                        consuming = false;
                        if self.close_consumer() {
                            break;
                        }
                    }
                }

                inbound = self.source.recv(), if consuming => {
                    match inbound {
                        Some(Inbound::Message(message)) => match self.handle(message, false).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::ConsumerDone) => {
                                consuming = false;
                                if self.close_consumer() {
                                    break;
                                }
                            }
                            Ok(Flow::StreamDone) => break,
                            Err(e) => {
                                self.fail(e);
                                break;
                            }
                        },
                        Some(Inbound::Completed) | None => {
                            consuming = false;
                            if self.close_consumer() {
                                break;
                            }
                        }
                    }
                }

                replayed = next_replay(&mut self.replay) => {
                    match replayed {
                        Some(message) => match self.handle(message, true).await {
                            Ok(Flow::StreamDone) => break,
                            Ok(_) => {}
                            Err(e) => {
                                self.fail(e);
                                break;
                            }
                        },
                        None => {
                            self.replay = None;
                            if !consuming {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.sinks.complete();
        info!(stream = %self.name, stats = ?self.stats.snapshot(), "stream completed");
    }

    /// Mark the consumer side closed; true when nothing is left to serve
    fn close_consumer(&self) -> bool {
        info!(stream = %self.name, "consumer closed");
        self.sinks.close_consumer();
        self.replay.is_none()
    }

    async fn handle(&mut self, message: Message, replayed: bool) -> Result<Flow> {
        let (stages, merge_point) = self.chain.snapshot();
        let split = merge_point.unwrap_or(stages.len());
        let mut flow = Flow::Continue;

        let head_output = if replayed {
            vec![message]
        } else {
            self.stats.inc_consumed();
            let outcome = execute(&stages[..split], message).await?;
            if outcome.completed {
                flow = if merge_point.is_some() {
                    Flow::ConsumerDone
                } else {
                    Flow::StreamDone
                };
            }
            outcome.emitted
        };

        for message in head_output {
            let outcome = execute(&stages[split..], message).await?;
            for output in outcome.emitted {
                self.emit(output).await;
            }
            if outcome.completed {
                flow = Flow::StreamDone;
                break;
            }
        }

        Ok(flow)
    }

    async fn emit(&self, message: Message) {
        self.stats.inc_emitted();
        for subscriber in self.sinks.subscribers() {
            subscriber(&message);
        }

        let Some(producer) = &self.producer else {
            return;
        };

        let record = ProduceRecord::from_message(message, &producer.topic, producer.version);
        match producer.client.produce(record, producer.produce_type).await {
            Ok(()) => self.stats.inc_produced(),
            Err(e) => {
                self.stats.inc_produce_errors();
                warn!(stream = %self.name, topic = %producer.topic, error = %e, "produce failed");
                self.sinks.notify_error(&e);
            }
        }
    }

    fn fail(&self, err: StreamsError) {
        self.stats.inc_errors();
        error!(stream = %self.name, error = %err, "pipeline failed");
        self.sinks.notify_error(&err);
    }
}

async fn any_fired(signals: Vec<TerminationSignal>) {
    if signals.is_empty() {
        return std::future::pending().await;
    }

    let waits = signals
        .into_iter()
        .map(|signal| Box::pin(async move { signal.fired().await }));
    futures::future::select_all(waits).await;
}

async fn next_replay(replay: &mut Option<mpsc::UnboundedReceiver<Message>>) -> Option<Message> {
    match replay {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
