//! Common test utilities for integration tests

#![allow(dead_code)]

use kstreams::{KafkaStreams, MemoryClientFactory, MemoryStoreFactory, Message, StreamsConfig};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single wait in these tests
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Streams backed by in-memory clients and stores
pub fn memory_streams() -> (KafkaStreams, Arc<MemoryClientFactory>) {
    let clients = Arc::new(MemoryClientFactory::new());
    let streams = KafkaStreams::with_factories(
        StreamsConfig::default(),
        clients.clone(),
        Arc::new(MemoryStoreFactory),
    )
    .expect("default config is valid");
    (streams, clients)
}

/// Shared vector filled by a `for_each` subscriber
#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<Message>>>);

impl Collected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> impl Fn(&Message) + Send + Sync + 'static {
        let inner = self.0.clone();
        move |m: &Message| inner.lock().push(m.clone())
    }

    pub fn values(&self) -> Vec<Message> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Await `fut`, failing the test if it takes longer than `TIMEOUT`
pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Poll `condition` until it holds
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    within(what, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
