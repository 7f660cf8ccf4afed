//! Stage interpreter and execution statistics
//!
//! [`execute`] runs a single message through a slice of stages. It walks the
//! chain depth first: an item produced by `flat_map` travels through every
//! remaining stage before the next item is pulled from the expansion, and
//! asynchronous stages are awaited in place.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::message::Message;
use crate::pipeline::stage::{MessageIter, Stage};

/// Result of running one inbound message through a slice of stages
#[derive(Debug, Default)]
pub struct Outcome {
    /// Messages that left the last stage, in order
    pub emitted: Vec<Message>,

    /// A `take` limit was reached or an `until` signal fired
    pub completed: bool,
}

enum Work {
    Message(usize, Message),
    Expand(usize, MessageIter),
}

/// Run `message` through `stages`.
///
/// Stops pulling further `flat_map` items once the slice completes. The
/// first stage error aborts the message and is returned.
pub async fn execute(stages: &[Arc<Stage>], message: Message) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let mut work = vec![Work::Message(0, message)];

    while let Some(item) = work.pop() {
        if outcome.completed {
            break;
        }

        let (mut index, mut message) = match item {
            Work::Message(index, message) => (index, message),
            Work::Expand(index, mut iter) => match iter.next() {
                Some(next) => {
                    work.push(Work::Expand(index, iter));
                    (index, next)
                }
                None => continue,
            },
        };

        loop {
            let Some(stage) = stages.get(index) else {
                outcome.emitted.push(message);
                break;
            };

            match stage.as_ref() {
                Stage::Map { func, .. } => message = func(message)?,
                Stage::AsyncMap(operator) => message = operator.process(message).await?,
                Stage::Filter { predicate, .. } => {
                    if !predicate(&message) {
                        break;
                    }
                }
                Stage::FlatMap { func, .. } => {
                    work.push(Work::Expand(index + 1, func(message)?));
                    break;
                }
                Stage::Tap { func, .. } => func(&message)?,
                Stage::Take { limit, seen } => {
                    let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    if n > *limit {
                        outcome.completed = true;
                        break;
                    }
                    if n == *limit {
                        trace!(limit = *limit, "take limit reached");
                        outcome.completed = true;
                    }
                }
                Stage::Skip { count, seen } => {
                    let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= *count {
                        break;
                    }
                }
                Stage::Until(signal) => {
                    if signal.is_fired() {
                        outcome.completed = true;
                        break;
                    }
                }
                Stage::Branch(targets) => {
                    for target in targets {
                        if (target.predicate)(&message) {
                            target.input.send(message.clone());
                        }
                    }
                }
            }

            index += 1;
        }
    }

    Ok(outcome)
}

/// Snapshot of a stream's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    /// Messages taken from the source
    pub consumed: u64,

    /// Messages delivered to subscribers
    pub emitted: u64,

    /// Messages handed to the producer successfully
    pub produced: u64,

    /// Failed produce attempts
    pub produce_errors: u64,

    /// Pipeline errors
    pub errors: u64,

    /// Entries re-injected by a table replay
    pub replayed: u64,
}

/// Live counters shared between a stream handle and its run loop
#[derive(Debug, Default)]
pub struct StatsTracker {
    consumed: AtomicU64,
    emitted: AtomicU64,
    produced: AtomicU64,
    produce_errors: AtomicU64,
    errors: AtomicU64,
    replayed: AtomicU64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_produce_errors(&self) {
        self.produce_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_replayed(&self, count: u64) {
        self.replayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            consumed: self.consumed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            produce_errors: self.produce_errors.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamsError;
    use crate::pipeline::operator::AsyncMapOperator;
    use crate::pipeline::signal::TerminationSignal;
    use crate::pipeline::source::StreamInput;
    use crate::pipeline::stage::BranchTarget;
    use serde_json::json;

    fn chain(stages: Vec<Stage>) -> Vec<Arc<Stage>> {
        stages.into_iter().map(Arc::new).collect()
    }

    #[tokio::test]
    async fn test_map_filter() {
        let stages = chain(vec![
            Stage::map("inc", |m: Message| Ok(json!(m.as_i64().unwrap_or(0) + 1))),
            Stage::filter("even", |m: &Message| m.as_i64().unwrap_or(1) % 2 == 0),
        ]);

        let out = execute(&stages, json!(1)).await.unwrap();
        assert_eq!(out.emitted, vec![json!(2)]);
        assert!(!out.completed);

        let out = execute(&stages, json!(2)).await.unwrap();
        assert!(out.emitted.is_empty());
    }

    #[tokio::test]
    async fn test_flat_map_is_depth_first() {
        let stages = chain(vec![
            Stage::flat_map("split", |m: Message| {
                let n = m.as_i64().unwrap_or(0);
                let items: Vec<Message> = (0..n).map(|i| json!(i)).collect();
                Ok(Box::new(items.into_iter()) as MessageIter)
            }),
            Stage::map("times10", |m: Message| Ok(json!(m.as_i64().unwrap_or(0) * 10))),
        ]);

        let out = execute(&stages, json!(3)).await.unwrap();
        assert_eq!(out.emitted, vec![json!(0), json!(10), json!(20)]);
    }

    #[tokio::test]
    async fn test_take_completes_and_drops_rest_of_expansion() {
        let stages = chain(vec![
            Stage::flat_map("split", |_m: Message| {
                Ok(Box::new(vec![json!("a"), json!("b"), json!("c")].into_iter()) as MessageIter)
            }),
            Stage::take(2),
        ]);

        let out = execute(&stages, json!(null)).await.unwrap();
        assert_eq!(out.emitted, vec![json!("a"), json!("b")]);
        assert!(out.completed);
    }

    #[tokio::test]
    async fn test_skip_then_take() {
        let stages = chain(vec![Stage::skip(2), Stage::take(1)]);

        for i in 0..2 {
            let out = execute(&stages, json!(i)).await.unwrap();
            assert!(out.emitted.is_empty());
        }
        let out = execute(&stages, json!(2)).await.unwrap();
        assert_eq!(out.emitted, vec![json!(2)]);
        assert!(out.completed);
    }

    #[tokio::test]
    async fn test_until_signal() {
        let signal = TerminationSignal::new();
        let stages = chain(vec![Stage::until(signal.clone())]);

        let out = execute(&stages, json!(1)).await.unwrap();
        assert_eq!(out.emitted.len(), 1);

        signal.fire();
        let out = execute(&stages, json!(2)).await.unwrap();
        assert!(out.emitted.is_empty());
        assert!(out.completed);
    }

    #[tokio::test]
    async fn test_async_stage_error_aborts() {
        let stages = chain(vec![
            Stage::async_map(AsyncMapOperator::new("fail", |_m: Message| async move {
                Err::<Message, _>(anyhow::anyhow!("storage down"))
            })),
            Stage::tap("never", |_m: &Message| panic!("must not run")),
        ]);

        let err = execute(&stages, json!(1)).await.unwrap_err();
        assert!(matches!(err, StreamsError::Operator { .. }));
    }

    #[tokio::test]
    async fn test_branch_forwards_to_matching_targets() {
        let (a, mut a_rx) = StreamInput::channel();
        let (b, mut b_rx) = StreamInput::channel();
        let stages = chain(vec![Stage::branch(vec![
            BranchTarget {
                predicate: Arc::new(|m: &Message| m.as_i64().unwrap_or(0) > 0),
                input: a,
            },
            BranchTarget {
                predicate: Arc::new(|_m: &Message| true),
                input: b,
            },
        ])]);

        let out = execute(&stages, json!(5)).await.unwrap();
        assert_eq!(out.emitted, vec![json!(5)]);
        assert_eq!(a_rx.try_recv().ok(), Some(crate::pipeline::source::Inbound::Message(json!(5))));
        assert_eq!(b_rx.try_recv().ok(), Some(crate::pipeline::source::Inbound::Message(json!(5))));

        execute(&stages, json!(-1)).await.unwrap();
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = StatsTracker::new();
        stats.inc_consumed();
        stats.inc_consumed();
        stats.inc_emitted();
        stats.add_replayed(3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.consumed, 2);
        assert_eq!(snapshot.emitted, 1);
        assert_eq!(snapshot.replayed, 3);
        assert_eq!(snapshot.errors, 0);
    }
}
