//! Word Count Demo
//!
//! Counts words per line and keeps the latest count per word in a table.
//!
//! Runs fully in memory by default. Set `KSTREAMS_DEMO_KAFKA=1` to consume
//! `word-count-input` from the brokers configured through `KSTREAMS_KAFKA__*`.

use kstreams::message::{self, Message};
use kstreams::{
    KafkaStreams, KeyValueStore, MemoryClientFactory, MemoryStoreFactory, StreamOps,
    StreamsConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,kstreams=debug")
        .init();

    let config = StreamsConfig::load(None::<&str>)?;
    let use_kafka = std::env::var("KSTREAMS_DEMO_KAFKA").is_ok();

    let memory_clients = Arc::new(MemoryClientFactory::new());
    let streams = if use_kafka {
        KafkaStreams::new(config)?
    } else {
        KafkaStreams::with_factories(config, memory_clients.clone(), Arc::new(MemoryStoreFactory))?
    };

    let mut words = streams.get_kstream(Some("word-count-input"));
    words
        .flat_map(|line: Message| {
            message::text_form(&line)
                .to_lowercase()
                .split_whitespace()
                .map(|word| message::kv(word, 1))
                .collect::<Vec<_>>()
        })
        .count_by_key("key", "count")
        .map(|counted| message::kv(counted["key"].clone(), counted["count"].clone()))
        .on_error(|e| tracing::error!(error = %e, "word count failed"))
        .to("word-count-output");
    words.start().await?;

    if let Some(client) = memory_clients.last_client() {
        client.fake_incoming_messages(
            [
                "the quick brown fox",
                "jumps over the lazy dog",
                "the dog sleeps",
            ]
            .into_iter()
            .map(|line| json!(line)),
        );
        client.end_of_input();
    }

    tokio::time::timeout(Duration::from_secs(5), words.completed())
        .await
        .ok();

    let counts = words.storage().state().await?;
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (word, count) in sorted {
        info!(%word, %count, "count");
    }

    info!(stats = ?words.get_stats(), clients = ?streams.stats(), "done");
    streams.close_all().await?;
    Ok(())
}
