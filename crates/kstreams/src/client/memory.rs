//! In-process messaging client
//!
//! Messages are injected with [`MemoryClient::fake_incoming_messages`] and
//! everything produced is recorded instead of being sent anywhere.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::{ClientCounters, ClientFactory, ClientStats, ErrorCallback, MessagingClient, ProduceRecord};
use crate::error::{LifecycleError, Result};
use crate::message::Message;
use crate::pipeline::{Inbound, StreamInput};

#[derive(Default)]
struct MemoryClientState {
    input: Option<StreamInput>,
    pending: Vec<Inbound>,
    producer_topic: Option<String>,
    producer_ready: bool,
    closed: bool,
}

/// Messaging client that lives entirely in memory
#[derive(Default)]
pub struct MemoryClient {
    topic: Option<String>,
    state: Mutex<MemoryClientState>,
    produced: Mutex<Vec<ProduceRecord>>,
    counters: ClientCounters,
}

impl MemoryClient {
    pub fn new(topic: Option<&str>) -> Self {
        Self {
            topic: topic.map(str::to_string),
            ..Self::default()
        }
    }

    /// Deliver messages as if they had been consumed from the topic.
    ///
    /// Messages injected before `start` are held and flushed in order once
    /// the client starts.
    pub fn fake_incoming_messages<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for message in messages {
            match &state.input {
                Some(input) => {
                    self.counters.record_consumed();
                    input.send(message);
                }
                None => state.pending.push(Inbound::Message(message)),
            }
        }
    }

    /// Signal that the topic has no more messages
    pub fn end_of_input(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &state.input {
            Some(input) => input.complete(),
            None => state.pending.push(Inbound::Completed),
        }
    }

    /// Every record sent so far
    pub fn produced_records(&self) -> Vec<ProduceRecord> {
        self.produced.lock().clone()
    }

    /// Payloads of every record sent so far
    pub fn produced_values(&self) -> Vec<Message> {
        self.produced
            .lock()
            .iter()
            .map(|record| record.value.clone())
            .collect()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().input.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    async fn start(&self, input: StreamInput, _on_error: ErrorCallback, with_producer: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LifecycleError::Closed { kind: "client" }.into());
        }

        for item in state.pending.drain(..) {
            match item {
                Inbound::Message(message) => {
                    self.counters.record_consumed();
                    input.send(message);
                }
                Inbound::Completed => input.complete(),
            }
        }
        state.input = Some(input);
        if with_producer {
            state.producer_ready = true;
        }

        debug!(topic = ?self.topic, "memory client started");
        Ok(())
    }

    async fn setup_producer(&self, topic: &str, _partitions: i32, _on_error: ErrorCallback) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LifecycleError::Closed { kind: "client" }.into());
        }
        state.producer_topic = Some(topic.to_string());
        state.producer_ready = true;
        Ok(())
    }

    async fn send(&self, record: ProduceRecord) -> Result<()> {
        {
            let state = self.state.lock();
            if state.closed {
                self.counters.record_produce_error();
                return Err(LifecycleError::Closed { kind: "client" }.into());
            }
            if !state.producer_ready {
                self.counters.record_produce_error();
                return Err(LifecycleError::ProducerNotReady.into());
            }
        }

        self.produced.lock().push(record);
        self.counters.record_produced();
        Ok(())
    }

    fn stats(&self) -> ClientStats {
        let state = self.state.lock();
        self.counters
            .snapshot(self.topic.clone(), state.producer_topic.clone())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.input = None;
        Ok(())
    }
}

/// Creates `MemoryClient`s and keeps a typed handle to each of them
#[derive(Default)]
pub struct MemoryClientFactory {
    clients: Mutex<Vec<Arc<MemoryClient>>>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created client
    pub fn last_client(&self) -> Option<Arc<MemoryClient>> {
        self.clients.lock().last().cloned()
    }

    pub fn clients(&self) -> Vec<Arc<MemoryClient>> {
        self.clients.lock().clone()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(&self, topic: Option<&str>) -> Arc<dyn MessagingClient> {
        let client = Arc::new(MemoryClient::new(topic));
        self.clients.lock().push(client.clone());
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamsError;
    use serde_json::json;

    fn noop() -> ErrorCallback {
        Arc::new(|_e: &StreamsError| {})
    }

    #[tokio::test]
    async fn test_pending_messages_flush_on_start() {
        let client = MemoryClient::new(Some("in"));
        client.fake_incoming_messages(vec![json!(1), json!(2)]);
        client.end_of_input();

        let (input, mut rx) = StreamInput::channel();
        client.start(input, noop(), false).await.unwrap();

        assert_eq!(rx.recv().await, Some(Inbound::Message(json!(1))));
        assert_eq!(rx.recv().await, Some(Inbound::Message(json!(2))));
        assert_eq!(rx.recv().await, Some(Inbound::Completed));
        assert_eq!(client.stats().consumed, 2);
    }

    #[tokio::test]
    async fn test_send_requires_producer() {
        let client = MemoryClient::new(None);
        let err = client.send(ProduceRecord::new("out", json!(1))).await.unwrap_err();
        assert!(matches!(
            err,
            StreamsError::Lifecycle(LifecycleError::ProducerNotReady)
        ));

        client.setup_producer("out", 1, noop()).await.unwrap();
        client.send(ProduceRecord::new("out", json!(1))).await.unwrap();
        assert_eq!(client.produced_values(), vec![json!(1)]);

        let stats = client.stats();
        assert_eq!(stats.out_topic.as_deref(), Some("out"));
        assert_eq!(stats.produced, 1);
        assert_eq!(stats.produce_errors, 1);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_sends() {
        let client = MemoryClient::new(None);
        client.setup_producer("out", 1, noop()).await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(client.send(ProduceRecord::new("out", json!(1))).await.is_err());
    }

    #[tokio::test]
    async fn test_tombstone_requires_key() {
        let client = MemoryClient::new(None);
        client.setup_producer("out", 1, noop()).await.unwrap();
        assert!(client.tombstone("out", "").await.is_err());
        client.tombstone("out", "k").await.unwrap();
        let records = client.produced_records();
        assert_eq!(records[0].key.as_deref(), Some("k"));
        assert!(records[0].value.is_null());
    }

    #[test]
    fn test_factory_tracks_clients() {
        let factory = MemoryClientFactory::new();
        factory.create(Some("a"));
        factory.create(None);
        assert_eq!(factory.clients().len(), 2);
        assert_eq!(factory.last_client().and_then(|c| c.topic.clone()), None);
    }
}
