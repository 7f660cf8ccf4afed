//! Changelog stream

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::join::{JoinEngine, JoinType, Side};
use super::{StreamDsl, StreamOps};
use crate::client::MessagingClient;
use crate::error::Result;
use crate::message::{Message, KEY_FIELD};
use crate::pipeline::{BranchTarget, PredicateFn, Stage};
use crate::state::{KeyValueStore, MemoryStore};

/// An unbounded sequence of messages flowing through a stage chain.
///
/// Streams derived from this one (`branch`, the joins and `merge`) share
/// its messaging client and get a fresh in-memory store. They must be
/// started like any other stream; messages reaching them earlier are held
/// in their input channel.
pub struct KStream {
    dsl: StreamDsl,
}

impl KStream {
    pub fn new(topic: Option<&str>, storage: Arc<dyn KeyValueStore>, client: Arc<dyn MessagingClient>) -> Self {
        Self {
            dsl: StreamDsl::new("KStream", topic, storage, client),
        }
    }

    pub(crate) fn from_dsl(dsl: StreamDsl) -> Self {
        Self { dsl }
    }

    /// Spawn the run loop and connect the client
    pub async fn start(&mut self) -> Result<()> {
        self.dsl.launch(None).await
    }

    /// Stop the run loop and close the client this stream owns
    pub async fn close(&mut self) -> Result<()> {
        self.dsl.shutdown().await
    }

    fn derive(&self, suffix: &str) -> KStream {
        let dsl = StreamDsl::new("KStream", None, Arc::new(MemoryStore::new()), self.dsl.client())
            .with_options(self.dsl.options().clone())
            .named(format!("{}-{}", self.dsl.name(), suffix))
            .borrowing_client();
        KStream { dsl }
    }

    /// Fan out into one stream per predicate.
    ///
    /// A message goes to every branch whose predicate holds, and keeps
    /// flowing through this stream regardless. Branches complete when this
    /// stream completes.
    pub fn branch(&mut self, predicates: Vec<PredicateFn>) -> Vec<KStream> {
        let branches: Vec<KStream> = (0..predicates.len())
            .map(|i| self.derive(&format!("branch-{i}")))
            .collect();

        let targets = predicates
            .into_iter()
            .zip(&branches)
            .map(|(predicate, branch)| BranchTarget {
                predicate,
                input: branch.dsl.input(),
            })
            .collect();
        self.dsl.push_stage(Stage::branch(targets));

        for branch in &branches {
            let input = branch.dsl.input();
            self.dsl
                .sinks()
                .on_complete(Box::new(move || input.complete()));
        }

        debug!(stream = %self.dsl.name(), branches = branches.len(), "branched");
        branches
    }

    /// Pairs of records sharing `key_field`; unmatched records are never emitted
    pub fn inner_join(&mut self, other: &KStream, key_field: &str) -> KStream {
        self.join(other, key_field, JoinType::Inner)
    }

    /// Like `inner_join`, plus unmatched records of this stream with
    /// `right: null` once this stream completes
    pub fn left_join(&mut self, other: &KStream, key_field: &str) -> KStream {
        self.join(other, key_field, JoinType::Left)
    }

    /// Like `inner_join`, plus unmatched records of either stream with a
    /// null counterpart once their stream completes
    pub fn outer_join(&mut self, other: &KStream, key_field: &str) -> KStream {
        self.join(other, key_field, JoinType::Outer)
    }

    /// Join on the default `key` field
    pub fn join_on_key(&mut self, other: &KStream, join_type: JoinType) -> KStream {
        self.join(other, KEY_FIELD, join_type)
    }

    fn join(&mut self, other: &KStream, key_field: &str, join_type: JoinType) -> KStream {
        let joined = self.derive(&format!("{join_type:?}-join").to_lowercase());
        let engine = Arc::new(JoinEngine::new(join_type, key_field, joined.dsl.input()));

        for (side, stream) in [(Side::Left, &*self), (Side::Right, other)] {
            let sinks = stream.dsl.sinks();

            let tap = engine.clone();
            sinks.subscribe(Arc::new(move |record: &Message| tap.push(side, record)));

            let done = engine.clone();
            sinks.on_complete(Box::new(move || done.complete(side)));
        }

        debug!(
            left = %self.dsl.name(),
            right = %other.dsl.name(),
            key_field,
            join_type = ?join_type,
            "joined"
        );
        joined
    }

    /// A stream fed by both this stream and `other`, completing once both did
    pub fn merge(&mut self, other: &KStream) -> KStream {
        let merged = self.derive("merge");
        let pending = Arc::new(AtomicUsize::new(2));

        for stream in [&*self, other] {
            let sinks = stream.dsl.sinks();

            let input = merged.dsl.input();
            sinks.subscribe(Arc::new(move |message: &Message| {
                input.send(message.clone());
            }));

            let input = merged.dsl.input();
            let pending = pending.clone();
            sinks.on_complete(Box::new(move || {
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    input.complete();
                }
            }));
        }

        merged
    }
}

impl StreamOps for KStream {
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
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn memory_stream() -> KStream {
        KStream::new(None, Arc::new(MemoryStore::new()), Arc::new(MemoryClient::new(None)))
    }

    #[tokio::test]
    async fn test_map_filter_take() {
        let mut stream = memory_stream();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        stream
            .map(|m| json!(m.as_i64().unwrap_or_default() * 10))
            .filter(|m| m.as_i64().unwrap_or_default() > 10)
            .take(2)
            .for_each(move |m| sink.lock().push(m.clone()));
        stream.start().await.unwrap();

        for i in 0..10 {
            stream.write_to_stream(json!(i));
        }

        tokio::time::timeout(Duration::from_secs(1), stream.completed())
            .await
            .expect("take completes the stream");
        assert_eq!(*seen.lock(), vec![json!(20), json!(30)]);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut stream = memory_stream();
        stream.start().await.unwrap();
        assert!(stream.start().await.is_err());
        stream.close().await.unwrap();
        assert!(stream.is_completed());
    }

    #[tokio::test]
    async fn test_merge_completes_after_both_sources() {
        let mut a = memory_stream();
        let mut b = memory_stream();
        let mut merged = a.merge(&b);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        merged.for_each(move |m| sink.lock().push(m.clone()));

        merged.start().await.unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();

        a.write_to_stream(json!("a"));
        a.complete_input();
        b.write_to_stream(json!("b"));
        b.complete_input();

        tokio::time::timeout(Duration::from_secs(1), merged.completed())
            .await
            .expect("merged stream completes");

        let mut values = seen.lock().clone();
        values.sort_by_key(|v| v.to_string());
        assert_eq!(values, vec![json!("a"), json!("b")]);
    }
}
