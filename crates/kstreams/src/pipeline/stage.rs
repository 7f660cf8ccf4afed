//! Pipeline stage variants
//!
//! A pipeline is an ordered list of [`Stage`] values interpreted by the
//! executor. Counters for `take` and `skip` live inside the stage so they
//! are scoped to the one pipeline that owns them.

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::error::Result;
use crate::message::Message;
use crate::pipeline::operator::StreamOperator;
use crate::pipeline::signal::TerminationSignal;
use crate::pipeline::source::StreamInput;

/// Lazily produced expansion of a `flat_map`
pub type MessageIter = Box<dyn Iterator<Item = Message> + Send>;

pub type MapFn = Arc<dyn Fn(Message) -> Result<Message> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
pub type FlatMapFn = Arc<dyn Fn(Message) -> Result<MessageIter> + Send + Sync>;
pub type TapFn = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// A predicate-gated downstream stream
#[derive(Clone)]
pub struct BranchTarget {
    pub predicate: PredicateFn,
    pub input: StreamInput,
}

/// One transformation step
pub enum Stage {
    Map { name: String, func: MapFn },
    AsyncMap(Arc<dyn StreamOperator>),
    Filter { name: String, predicate: PredicateFn },
    FlatMap { name: String, func: FlatMapFn },
    Tap { name: String, func: TapFn },
    Take { limit: u64, seen: AtomicU64 },
    Skip { count: u64, seen: AtomicU64 },
    Until(TerminationSignal),
    Branch(Vec<BranchTarget>),
}

impl Stage {
    pub fn map<S, F>(name: S, func: F) -> Self
    where
        S: Into<String>,
        F: Fn(Message) -> Result<Message> + Send + Sync + 'static,
    {
        Stage::Map {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn async_map<O: StreamOperator + 'static>(operator: O) -> Self {
        Stage::AsyncMap(Arc::new(operator))
    }

    pub fn filter<S, P>(name: S, predicate: P) -> Self
    where
        S: Into<String>,
        P: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Stage::Filter {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn flat_map<S, F>(name: S, func: F) -> Self
    where
        S: Into<String>,
        F: Fn(Message) -> Result<MessageIter> + Send + Sync + 'static,
    {
        Stage::FlatMap {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn tap<S, F>(name: S, func: F) -> Self
    where
        S: Into<String>,
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        Stage::Tap {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn take(limit: u64) -> Self {
        Stage::Take {
            limit,
            seen: AtomicU64::new(0),
        }
    }

    pub fn skip(count: u64) -> Self {
        Stage::Skip {
            count,
            seen: AtomicU64::new(0),
        }
    }

    pub fn until(signal: TerminationSignal) -> Self {
        Stage::Until(signal)
    }

    pub fn branch(targets: Vec<BranchTarget>) -> Self {
        Stage::Branch(targets)
    }

    pub fn name(&self) -> &str {
        match self {
            Stage::Map { name, .. }
            | Stage::Filter { name, .. }
            | Stage::FlatMap { name, .. }
            | Stage::Tap { name, .. } => name.as_str(),
            Stage::AsyncMap(op) => op.name(),
            Stage::Take { .. } => "take",
            Stage::Skip { .. } => "skip",
            Stage::Until(_) => "until",
            Stage::Branch(_) => "branch",
        }
    }

    /// The termination signal of an `until` stage
    pub fn signal(&self) -> Option<&TerminationSignal> {
        match self {
            Stage::Until(signal) => Some(signal),
            _ => None,
        }
    }
}

impl Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Take { limit, seen } => f
                .debug_struct("Take")
                .field("limit", limit)
                .field("seen", seen)
                .finish(),
            Stage::Skip { count, seen } => f
                .debug_struct("Skip")
                .field("count", count)
                .field("seen", seen)
                .finish(),
            Stage::Branch(targets) => f
                .debug_struct("Branch")
                .field("targets", &targets.len())
                .finish(),
            other => f.debug_tuple("Stage").field(&other.name()).finish(),
        }
    }
}
