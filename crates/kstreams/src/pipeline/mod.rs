//! Operator pipeline
//!
//! This module provides the data-driven pipeline engine:
//! - Stage: tagged transformation steps (map, filter, flat_map, tap, take, skip, until, branch)
//! - StreamOperator: asynchronous stages awaited one message at a time
//! - execute: the interpreter running one message through a stage slice
//! - TerminationPolicy: time, count and offset bounds on consumption

pub mod executor;
pub mod operator;
pub mod signal;
pub mod source;
pub mod stage;
pub mod termination;

pub use executor::{execute, ExecutorStats, Outcome, StatsTracker};
pub use operator::{AsyncMapOperator, StreamOperator};
pub use signal::TerminationSignal;
pub use source::{Inbound, StreamInput};
pub use stage::{BranchTarget, MessageIter, PredicateFn, Stage};
pub use termination::{TerminationPolicy, DEFAULT_CONSUME_COUNT, DEFAULT_CONSUME_DURATION};
