//! Chaining operators shared by streams and tables

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::StreamDsl;
use crate::client::ProduceType;
use crate::error::StreamsError;
use crate::message::{self, Message};
use crate::operators::{CountByKey, SumByKey};
use crate::pipeline::{AsyncMapOperator, ExecutorStats, MessageIter, Stage, StreamOperator, TerminationSignal};
use crate::state::KeyValueStore;

/// Operator chaining available on every stream.
///
/// Every stage method appends to the tail of the chain and returns the
/// stream for further chaining. Stages may be added after `start()`; they
/// apply to messages that have not yet reached the tail.
pub trait StreamOps {
    fn dsl(&self) -> &StreamDsl;

    fn dsl_mut(&mut self) -> &mut StreamDsl;

    /// Synchronous 1:1 transform
    fn map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::map("map", move |m| Ok(f(m))));
        self
    }

    /// Fallible transform; an error ends the stream
    fn try_map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Message) -> anyhow::Result<Message> + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl()
            .push_stage(Stage::map("try_map", move |m| f(m).map_err(|e| StreamsError::operator("try_map", e))));
        self
    }

    /// Asynchronous transform, awaited before the next message enters the stage
    fn async_map<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Message>> + Send + 'static,
        Self: Sized,
    {
        self.dsl()
            .push_stage(Stage::async_map(AsyncMapOperator::new("async_map", f)));
        self
    }

    /// Append a custom asynchronous operator
    fn operator<O>(&mut self, operator: O) -> &mut Self
    where
        O: StreamOperator + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::async_map(operator));
        self
    }

    fn filter<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::filter("filter", predicate));
        self
    }

    /// Expand one message into zero or more, consumed lazily
    fn flat_map<F, I>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Message) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Message>,
        I::IntoIter: Send + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::flat_map("flat_map", move |m| {
            let iter: MessageIter = Box::new(f(m).into_iter());
            Ok(iter)
        }));
        self
    }

    /// Side effect that leaves the message untouched
    fn tap<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::tap("tap", move |m| {
            f(m);
            Ok(())
        }));
        self
    }

    /// Side effect whose failure ends the stream
    fn try_tap<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().push_stage(Stage::tap("try_tap", move |m| {
            f(m).map_err(|e| StreamsError::operator("try_tap", e))
        }));
        self
    }

    /// Complete the stream once `n` messages passed this point.
    ///
    /// `take(0)` completes without waiting for a message.
    fn take(&mut self, n: u64) -> &mut Self
    where
        Self: Sized,
    {
        let stage = match n {
            0 => Stage::until(TerminationSignal::fired_now()),
            n => Stage::take(n),
        };
        self.dsl().push_stage(stage);
        self
    }

    fn skip(&mut self, n: u64) -> &mut Self
    where
        Self: Sized,
    {
        self.dsl().push_stage(Stage::skip(n));
        self
    }

    /// Stop forwarding once `signal` fires
    fn until(&mut self, signal: TerminationSignal) -> &mut Self
    where
        Self: Sized,
    {
        self.dsl().push_stage(Stage::until(signal));
        self
    }

    /// Count messages per key, emitting `{key_field: key, count_field: n}`
    fn count_by_key(&mut self, key_field: &str, count_field: &str) -> &mut Self
    where
        Self: Sized,
    {
        let storage = self.dsl().storage();
        self.operator(CountByKey::new(storage, key_field, count_field))
    }

    /// Accumulate `value_field` per key, emitting `{key_field: key, sum_field: total}`
    fn sum_by_key(&mut self, key_field: &str, value_field: &str, sum_field: &str) -> &mut Self
    where
        Self: Sized,
    {
        let storage = self.dsl().storage();
        self.operator(SumByKey::new(storage, key_field, value_field, sum_field))
    }

    /// Split string messages into `{key, value}` on `delimiter`
    fn map_string_to_kv(&mut self, delimiter: &str, key_index: usize, value_index: usize) -> &mut Self
    where
        Self: Sized,
    {
        let delimiter = delimiter.to_string();
        self.dsl().push_stage(Stage::map("map_string_to_kv", move |m| {
            Ok(message::string_to_kv(m, &delimiter, key_index, value_index))
        }));
        self
    }

    fn map_json_parse(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.dsl()
            .push_stage(Stage::map("map_json_parse", message::json_parse));
        self
    }

    fn map_stringify(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.dsl()
            .push_stage(Stage::map("map_stringify", |m| Ok(message::stringify(m))));
        self
    }

    /// Invoke `callback` once, when the `n`-th message passes this point
    fn at_throughput<F>(&mut self, n: u64, callback: F) -> &mut Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
        Self: Sized,
    {
        let seen = AtomicU64::new(0);
        self.dsl().push_stage(Stage::tap("at_throughput", move |m| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 == n {
                callback(m);
            }
            Ok(())
        }));
        self
    }

    /// Subscribe to every message leaving the chain
    fn for_each<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().sinks().subscribe(Arc::new(f));
        self
    }

    /// Register an error handler
    fn on_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&StreamsError) + Send + Sync + 'static,
        Self: Sized,
    {
        self.dsl().sinks().on_error(Arc::new(f));
        self
    }

    /// Produce every emitted message to `topic` with the stream's defaults
    fn to(&mut self, topic: &str) -> &mut Self
    where
        Self: Sized,
    {
        let options = self.dsl().options().clone();
        self.to_with(topic, options.default_partitions, options.produce_type)
    }

    /// Must be called before `start()`; later calls are ignored
    fn to_with(&mut self, topic: &str, partitions: i32, produce_type: ProduceType) -> &mut Self
    where
        Self: Sized,
    {
        self.dsl_mut().set_output(topic, partitions, produce_type);
        self
    }

    /// Push a message into the source as if it had been consumed
    fn write_to_stream(&self, message: Message) {
        self.dsl().write_to_stream(message);
    }

    /// End the source; the stream completes once the backlog drains
    fn complete_input(&self) {
        self.dsl().complete_input();
    }

    /// Resolves once the stream completed
    fn completed(&self) -> BoxFuture<'static, ()> {
        self.dsl().sinks().wait_completed()
    }

    fn is_completed(&self) -> bool {
        self.dsl().sinks().is_completed()
    }

    fn get_stats(&self) -> ExecutorStats {
        self.dsl().stats_tracker().snapshot()
    }

    fn storage(&self) -> Arc<dyn KeyValueStore> {
        self.dsl().storage()
    }

    fn output_topic(&self) -> Option<&str> {
        self.dsl().output_topic()
    }
}
