//! Entry point creating streams and tables from shared configuration

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::{ClientFactory, ClientStats, KafkaClientFactory, MessagingClient};
use crate::config::StreamsConfig;
use crate::dsl::{KStream, KTable, StreamDsl, StreamOps};
use crate::error::Result;
use crate::message::Message;
use crate::state::{KeyValueStore, MemoryStoreFactory, StorageFactory};

/// Creates streams and tables, handing each its own client and store.
///
/// Every client and store created here is tracked so that `close_all`
/// can release them.
pub struct KafkaStreams {
    config: StreamsConfig,
    client_factory: Arc<dyn ClientFactory>,
    storage_factory: Arc<dyn StorageFactory>,
    clients: Mutex<Vec<Arc<dyn MessagingClient>>>,
    storages: Mutex<Vec<Arc<dyn KeyValueStore>>>,
}

impl KafkaStreams {
    /// Kafka-backed streams with in-memory storage
    pub fn new(config: StreamsConfig) -> Result<Self> {
        let client_factory = Arc::new(KafkaClientFactory::new(config.kafka.clone()));
        Self::with_factories(config, client_factory, Arc::new(MemoryStoreFactory))
    }

    pub fn with_factories(
        config: StreamsConfig,
        client_factory: Arc<dyn ClientFactory>,
        storage_factory: Arc<dyn StorageFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client_factory,
            storage_factory,
            clients: Mutex::new(Vec::new()),
            storages: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StreamsConfig {
        &self.config
    }

    fn dsl(&self, kind: &'static str, topic: Option<&str>) -> StreamDsl {
        let client = self.client_factory.create(topic);
        let storage = self.storage_factory.create();
        self.clients.lock().push(client.clone());
        self.storages.lock().push(storage.clone());
        StreamDsl::new(kind, topic, storage, client).with_options(self.config.pipeline.clone())
    }

    /// Stream consuming `topic`, or fed only through `write_to_stream` when `None`
    pub fn get_kstream(&self, topic: Option<&str>) -> KStream {
        KStream::from_dsl(self.dsl("KStream", topic))
    }

    /// Table over `topic`, keyed by `key_map`
    pub fn get_ktable<F>(&self, topic: Option<&str>, key_map: F) -> KTable
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        KTable::from_dsl(self.dsl("KTable", topic), key_map)
    }

    /// In-memory stream over `messages`, completing after the last one
    pub fn from_messages<I>(&self, messages: I) -> KStream
    where
        I: IntoIterator<Item = Message>,
    {
        let stream = self.get_kstream(None);
        for message in messages {
            stream.write_to_stream(message);
        }
        stream.complete_input();
        stream
    }

    /// Statistics of every client created so far
    pub fn stats(&self) -> Vec<ClientStats> {
        self.clients
            .lock()
            .iter()
            .map(|client| client.stats())
            .collect()
    }

    /// Close every client, then every store
    pub async fn close_all(&self) -> Result<()> {
        let clients: Vec<_> = self.clients.lock().drain(..).collect();
        let storages: Vec<_> = self.storages.lock().drain(..).collect();

        for client in &clients {
            client.close().await?;
        }
        for storage in &storages {
            if let Err(e) = storage.close().await {
                warn!(error = %e, "failed to close store");
            }
        }

        info!(clients = clients.len(), storages = storages.len(), "closed all");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClientFactory;
    use crate::config::KafkaConfig;
    use serde_json::json;

    fn memory_streams() -> (KafkaStreams, Arc<MemoryClientFactory>) {
        let clients = Arc::new(MemoryClientFactory::new());
        let streams = KafkaStreams::with_factories(
            StreamsConfig::default(),
            clients.clone(),
            Arc::new(MemoryStoreFactory),
        )
        .unwrap();
        (streams, clients)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = StreamsConfig {
            kafka: KafkaConfig {
                brokers: String::new(),
                ..KafkaConfig::default()
            },
            ..StreamsConfig::default()
        };
        assert!(KafkaStreams::new(config).is_err());
    }

    #[tokio::test]
    async fn test_tracks_clients_and_closes_them() {
        let (streams, clients) = memory_streams();
        let _a = streams.get_kstream(Some("a"));
        let _b = streams.get_ktable(Some("b"), |m| m);

        let stats = streams.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].in_topic.as_deref(), Some("a"));

        streams.close_all().await.unwrap();
        assert!(clients.clients().iter().all(|c| c.is_closed()));
        assert!(streams.stats().is_empty());
    }

    #[tokio::test]
    async fn test_from_messages_completes() {
        let (streams, _) = memory_streams();
        let mut stream = streams.from_messages(vec![json!(1), json!(2)]);
        stream.start().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), stream.completed())
            .await
            .expect("source completes");
        assert_eq!(stream.get_stats().consumed, 2);
    }
}
