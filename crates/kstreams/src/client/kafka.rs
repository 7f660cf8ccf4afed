//! Kafka messaging client built on rdkafka
//!
//! Consumption runs on a background task that turns every Kafka record into
//! a structured message:
//!
//! ```json
//! {"key": "..", "value": "..", "topic": "..", "partition": 0, "offset": 42, "timestamp": 1700000000000}
//! ```
//!
//! `key` and `value` are the UTF-8 decoded bytes (or `null`). Use
//! `map_json_parse` on the stream to decode JSON payloads.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message as _;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ClientCounters, ClientFactory, ClientStats, ErrorCallback, MessagingClient, ProduceRecord};
use crate::config::KafkaConfig;
use crate::error::{LifecycleError, Result, StreamsError};
use crate::message::Message;
use crate::pipeline::StreamInput;

/// Kafka client for one stream
pub struct KafkaClient {
    topic: Option<String>,
    config: KafkaConfig,
    producer: RwLock<Option<FutureProducer>>,
    producer_topic: RwLock<Option<String>>,
    consume_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    counters: Arc<ClientCounters>,
}

impl KafkaClient {
    pub fn new(topic: Option<&str>, config: KafkaConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            topic: topic.map(str::to_string),
            config,
            producer: RwLock::new(None),
            producer_topic: RwLock::new(None),
            consume_task: Mutex::new(None),
            shutdown,
            counters: Arc::new(ClientCounters::default()),
        }
    }

    fn create_consumer(&self) -> Result<StreamConsumer> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("client.id", &self.config.client_id)
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("enable.auto.commit", self.config.enable_auto_commit.to_string())
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string());

        for (key, value) in &self.config.extra_config {
            client_config.set(key, value);
        }

        client_config
            .create()
            .map_err(|e| StreamsError::Configuration { source: Box::new(e) })
    }

    fn create_producer(&self) -> Result<FutureProducer> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("message.timeout.ms", self.config.send_timeout_ms.to_string());

        for (key, value) in &self.config.extra_config {
            client_config.set(key, value);
        }

        client_config
            .create()
            .map_err(|e| StreamsError::Configuration { source: Box::new(e) })
    }

    fn ensure_producer(&self) -> Result<()> {
        let mut producer = self.producer.write();
        if producer.is_none() {
            *producer = Some(self.create_producer()?);
            debug!(client_id = %self.config.client_id, "kafka producer created");
        }
        Ok(())
    }
}

fn to_message(record: &BorrowedMessage<'_>) -> Message {
    let key = record.key().map(|k| String::from_utf8_lossy(k).into_owned());
    let value = record.payload().map(|p| String::from_utf8_lossy(p).into_owned());

    json!({
        "key": key,
        "value": value,
        "topic": record.topic(),
        "partition": record.partition(),
        "offset": record.offset(),
        "timestamp": record.timestamp().to_millis(),
    })
}

#[async_trait]
impl MessagingClient for KafkaClient {
    fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    async fn start(&self, input: StreamInput, on_error: ErrorCallback, with_producer: bool) -> Result<()> {
        let Some(topic) = self.topic.clone() else {
            return Ok(());
        };

        if self.consume_task.lock().is_some() {
            return Err(LifecycleError::AlreadyStarted { kind: "kafka client" }.into());
        }

        let consumer = self.create_consumer()?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| StreamsError::Configuration { source: Box::new(e) })?;
        info!(topic = %topic, group_id = %self.config.group_id, "subscribed");

        if with_producer {
            self.ensure_producer()?;
        }

        let counters = self.counters.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = consumer.recv() => match received {
                        Ok(record) => {
                            counters.record_consumed();
                            if !input.send(to_message(&record)) {
                                warn!(topic = %topic, "stream stopped listening, ending consumption");
                                break;
                            }
                        }
                        Err(e) => {
                            error!(topic = %topic, error = %e, "kafka consume error");
                            on_error(&StreamsError::from(e));
                        }
                    }
                }
            }
            debug!(topic = %topic, "kafka consumer task stopped");
        });

        *self.consume_task.lock() = Some(handle);
        Ok(())
    }

    async fn setup_producer(&self, topic: &str, _partitions: i32, _on_error: ErrorCallback) -> Result<()> {
        self.ensure_producer()?;
        *self.producer_topic.write() = Some(topic.to_string());
        info!(topic = %topic, "producer ready");
        Ok(())
    }

    async fn send(&self, record: ProduceRecord) -> Result<()> {
        let Some(producer) = self.producer.read().clone() else {
            self.counters.record_produce_error();
            return Err(LifecycleError::ProducerNotReady.into());
        };

        let payload = record.payload_bytes()?;
        let key = record.key.as_deref().or(record.partition_key.as_deref());

        let mut future_record: FutureRecord<'_, str, [u8]> = FutureRecord::to(&record.topic);
        if let Some(payload) = payload.as_deref() {
            future_record = future_record.payload(payload);
        }
        if let Some(key) = key {
            future_record = future_record.key(key);
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }
        if !record.headers.is_empty() {
            let mut headers = OwnedHeaders::new();
            for (k, v) in &record.headers {
                headers = headers.insert(Header {
                    key: k,
                    value: Some(v.as_bytes()),
                });
            }
            future_record = future_record.headers(headers);
        }

        match producer
            .send(future_record, Timeout::After(self.config.send_timeout()))
            .await
        {
            Ok(_) => {
                self.counters.record_produced();
                Ok(())
            }
            Err((e, _)) => {
                self.counters.record_produce_error();
                Err(StreamsError::from(e))
            }
        }
    }

    fn stats(&self) -> ClientStats {
        self.counters
            .snapshot(self.topic.clone(), self.producer_topic.read().clone())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let task = self.consume_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "kafka consumer task ended abnormally");
            }
        }

        let producer = self.producer.write().take();
        if let Some(producer) = producer {
            let timeout = self.config.send_timeout();
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| StreamsError::Unexpected(e.to_string()))??;
        }

        info!(topic = ?self.topic, "kafka client closed");
        Ok(())
    }
}

/// Creates a `KafkaClient` per stream from shared configuration
#[derive(Debug, Clone)]
pub struct KafkaClientFactory {
    config: KafkaConfig,
}

impl KafkaClientFactory {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for KafkaClientFactory {
    fn create(&self, topic: Option<&str>) -> Arc<dyn MessagingClient> {
        Arc::new(KafkaClient::new(topic, self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamsError;

    fn noop() -> ErrorCallback {
        Arc::new(|_e: &StreamsError| {})
    }

    #[tokio::test]
    async fn test_send_without_producer_is_rejected() {
        let client = KafkaClient::new(Some("in"), KafkaConfig::default());
        let err = client
            .send(ProduceRecord::new("out", serde_json::json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamsError::Lifecycle(LifecycleError::ProducerNotReady)
        ));
        assert_eq!(client.stats().produce_errors, 1);
    }

    #[tokio::test]
    async fn test_start_without_topic_is_noop() {
        let client = KafkaClient::new(None, KafkaConfig::default());
        let (input, _rx) = StreamInput::channel();
        client.start(input, noop(), false).await.unwrap();
        assert!(client.consume_task.lock().is_none());
        assert_eq!(client.stats().in_topic, None);
    }

    #[test]
    fn test_factory_passes_topic() {
        let factory = KafkaClientFactory::new(KafkaConfig::default());
        let client = factory.create(Some("words"));
        assert_eq!(client.topic(), Some("words"));
    }
}
