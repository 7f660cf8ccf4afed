//! Materialized table
//!
//! A table is a stream whose first stage maps every raw message to
//! `{key, value}`. Finalising it inserts a last-value fold into storage
//! right after that mapping and opens a replay channel that feeds
//! downstream stages alongside live updates:
//!
//! ```text
//! consumed -> key_map -> LastState -> [consume bound] -+-> downstream stages -> sinks
//!                                                      |
//! replay() ------------------------------------------- +
//! ```

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{StreamDsl, StreamOps};
use crate::client::MessagingClient;
use crate::error::{LifecycleError, Result};
use crate::message::{self, Message};
use crate::operators::LastState;
use crate::pipeline::{Stage, TerminationPolicy};
use crate::state::KeyValueStore;

const KIND: &str = "KTable";

/// Last-value-wins view over a stream
pub struct KTable {
    dsl: StreamDsl,
    replay_tx: mpsc::UnboundedSender<Message>,
    replay_rx: Option<mpsc::UnboundedReceiver<Message>>,
    finalised: bool,
}

impl KTable {
    /// Create a table whose messages are turned into `{key, value}` by `key_map`
    pub fn new<F>(
        topic: Option<&str>,
        key_map: F,
        storage: Arc<dyn KeyValueStore>,
        client: Arc<dyn MessagingClient>,
    ) -> Self
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        Self::from_dsl(StreamDsl::new(KIND, topic, storage, client), key_map)
    }

    pub(crate) fn from_dsl<F>(dsl: StreamDsl, key_map: F) -> Self
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        dsl.push_stage(Stage::map("key_map", move |m| Ok(key_map(m))));
        let (replay_tx, replay_rx) = mpsc::unbounded_channel();
        Self {
            dsl,
            replay_tx,
            replay_rx: Some(replay_rx),
            finalised: false,
        }
    }

    pub fn is_finalised(&self) -> bool {
        self.finalised
    }

    /// Fold consumed messages into storage and open the replay path.
    ///
    /// Fails with `AlreadyFinalised` on a second call, leaving the first
    /// call's effects in place.
    pub fn finalise(&mut self) -> Result<&mut Self> {
        if self.finalised {
            return Err(LifecycleError::AlreadyFinalised.into());
        }

        let chain = self.dsl.chain();
        chain.insert(1, Stage::async_map(LastState::new(self.dsl.storage())));
        chain.freeze_head();
        self.finalised = true;

        debug!(table = %self.dsl.name(), merge_point = ?chain.merge_point(), "table finalised");
        Ok(self)
    }

    /// Bound consumption by `policy`, finalising first if needed.
    ///
    /// Once the bound is reached the consumer side closes; the table keeps
    /// answering `replay()` until it is closed.
    pub fn consume_until(&mut self, policy: TerminationPolicy) -> Result<&mut Self> {
        if !self.finalised {
            self.finalise()?;
        }
        if let Some(stage) = policy.into_stage() {
            self.dsl.chain().push_head(stage);
        }
        Ok(self)
    }

    /// Stop consuming after `ms` milliseconds
    pub fn consume_until_ms(&mut self, ms: u64) -> Result<&mut Self> {
        self.consume_until(TerminationPolicy::Time(Duration::from_millis(ms)))
    }

    /// Stop consuming after `count` messages
    pub fn consume_until_count(&mut self, count: u64) -> Result<&mut Self> {
        self.consume_until(TerminationPolicy::Count(count))
    }

    /// Stop consuming at the latest broker offset.
    ///
    /// Finalises the table but never bounds consumption.
    pub fn consume_until_latest_offset(&mut self) -> Result<&mut Self> {
        self.consume_until(TerminationPolicy::LatestOffset)
    }

    /// Spawn the run loop and connect the client.
    ///
    /// A table with neither an input nor an output topic starts without
    /// being finalised.
    pub async fn start(&mut self) -> Result<()> {
        if self.dsl.is_started() {
            return Err(LifecycleError::AlreadyStarted { kind: KIND }.into());
        }

        let has_topics = self.dsl.topic().is_some() || self.dsl.output_topic().is_some();
        if has_topics && !self.finalised {
            self.finalise()?;
        }

        let replay = if self.finalised {
            self.replay_rx.take()
        } else {
            None
        };
        self.dsl.launch(replay).await
    }

    /// Current snapshot of the table
    pub async fn get_table(&self) -> Result<HashMap<String, Value>> {
        Ok(self.dsl.storage().state().await?)
    }

    /// Re-emit every entry of the current snapshot as `{key, value}` to
    /// the downstream stages and subscribers. Returns the number of entries.
    pub async fn replay(&self) -> Result<usize> {
        if !self.finalised {
            return Err(LifecycleError::NotFinalised.into());
        }

        let snapshot = self.dsl.storage().state().await?;
        let count = snapshot.len();
        for (key, value) in snapshot {
            self.replay_tx
                .send(message::kv(key, value))
                .map_err(|_| LifecycleError::Closed { kind: KIND })?;
        }

        self.dsl.stats_tracker().add_replayed(count as u64);
        info!(table = %self.dsl.name(), entries = count, "table replayed");
        Ok(count)
    }

    /// Resolves once the consumer side closed
    pub fn consumer_closed(&self) -> BoxFuture<'static, ()> {
        self.dsl.sinks().wait_consumer_closed()
    }

    pub fn is_consumer_closed(&self) -> bool {
        self.dsl.sinks().is_consumer_closed()
    }

    /// Stop the run loop and close the client; storage stays open
    pub async fn close(&mut self) -> Result<()> {
        self.dsl.shutdown().await
    }
}

impl StreamOps for KTable {
    fn dsl(&self) -> &StreamDsl {
        &self.dsl
    }

    fn dsl_mut(&mut self) -> &mut StreamDsl {
        &mut self.dsl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::error::StreamsError;
    use crate::state::MemoryStore;
    use serde_json::json;

    fn memory_table() -> KTable {
        KTable::new(
            None,
            |m| message::string_to_kv(m, " ", 0, 1),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryClient::new(None)),
        )
    }

    #[test]
    fn test_finalise_twice_is_rejected() {
        let mut table = memory_table();
        table.finalise().unwrap();
        let err = table.finalise().err().unwrap();
        assert!(matches!(
            err,
            StreamsError::Lifecycle(LifecycleError::AlreadyFinalised)
        ));
        assert!(table.is_finalised());
        assert_eq!(table.dsl.chain().merge_point(), Some(2));
    }

    #[test]
    fn test_consume_bound_lands_before_merge_point() {
        let mut table = memory_table();
        table.consume_until_count(3).unwrap();
        table.consume_until_latest_offset().unwrap();

        let (stages, merge_point) = table.dsl.chain().snapshot();
        assert_eq!(merge_point, Some(3));
        assert_eq!(stages[0].name(), "key_map");
        assert_eq!(stages[1].name(), "last_state");
        assert_eq!(stages[2].name(), "take");
    }

    #[tokio::test]
    async fn test_replay_requires_finalise() {
        let table = memory_table();
        assert!(table.replay().await.is_err());
    }

    #[tokio::test]
    async fn test_unfinalised_table_without_topics_starts() {
        let mut table = memory_table();
        table.start().await.unwrap();
        assert!(!table.is_finalised());
        assert!(table.start().await.is_err());

        table.write_to_stream(json!("a b"));
        table.close().await.unwrap();
        assert!(table.get_table().await.unwrap().is_empty());
    }
}
