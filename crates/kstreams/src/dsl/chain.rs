//! Shared state between a stream handle and its run loop
//!
//! `Chain` holds the stage list (stages may still be appended after the run
//! loop started) and `Sinks` holds everything that observes the stream's
//! output: subscribers, error handlers and lifecycle hooks.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

use crate::client::ErrorCallback;
use crate::error::StreamsError;
use crate::message::Message;
use crate::pipeline::{Stage, TerminationSignal};

/// Callback receiving every message a stream emits
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

pub(crate) type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ChainInner {
    stages: Vec<Arc<Stage>>,
    merge_point: Option<usize>,
}

/// Ordered stage list with an optional merge point.
///
/// Stages before the merge point only see consumed messages; replayed
/// messages enter at the merge point. Every change bumps a version that
/// the run loop watches.
pub(crate) struct Chain {
    inner: RwLock<ChainInner>,
    version: watch::Sender<u64>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: RwLock::new(ChainInner::default()),
            version,
        }
    }

    /// Receiver notified whenever a stage is added
    pub(crate) fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    pub(crate) fn push(&self, stage: Stage) {
        self.inner.write().stages.push(Arc::new(stage));
        self.bump();
    }

    /// Insert `stage` at `index`, clamped to the chain length
    pub(crate) fn insert(&self, index: usize, stage: Stage) {
        {
            let mut inner = self.inner.write();
            let index = index.min(inner.stages.len());
            inner.stages.insert(index, Arc::new(stage));
        }
        self.bump();
    }

    /// Append to the head slice, moving the merge point along
    pub(crate) fn push_head(&self, stage: Stage) {
        {
            let mut inner = self.inner.write();
            match inner.merge_point {
                Some(point) => {
                    inner.stages.insert(point, Arc::new(stage));
                    inner.merge_point = Some(point + 1);
                }
                None => inner.stages.push(Arc::new(stage)),
            }
        }
        self.bump();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().stages.len()
    }

    /// Fix the merge point at the current end of the chain
    pub(crate) fn freeze_head(&self) {
        {
            let mut inner = self.inner.write();
            inner.merge_point = Some(inner.stages.len());
        }
        self.bump();
    }

    pub(crate) fn merge_point(&self) -> Option<usize> {
        self.inner.read().merge_point
    }

    pub(crate) fn snapshot(&self) -> (Vec<Arc<Stage>>, Option<usize>) {
        let inner = self.inner.read();
        (inner.stages.clone(), inner.merge_point)
    }

    /// Termination signals before and after the merge point
    pub(crate) fn signals(&self) -> (Vec<TerminationSignal>, Vec<TerminationSignal>) {
        let inner = self.inner.read();
        let split = inner.merge_point.unwrap_or(inner.stages.len());

        let collect = |stages: &[Arc<Stage>]| -> Vec<TerminationSignal> {
            stages
                .iter()
                .filter_map(|stage| stage.signal().cloned())
                .collect()
        };
        (collect(&inner.stages[..split]), collect(&inner.stages[split..]))
    }
}

#[derive(Default)]
struct HookList {
    fired: bool,
    hooks: Vec<Hook>,
}

impl HookList {
    fn register(list: &Mutex<HookList>, hook: Hook) {
        let mut guard = list.lock();
        if guard.fired {
            drop(guard);
            hook();
        } else {
            guard.hooks.push(hook);
        }
    }

    /// Run every hook once; false if the list already fired
    fn fire(list: &Mutex<HookList>) -> bool {
        let hooks = {
            let mut guard = list.lock();
            if guard.fired {
                return false;
            }
            guard.fired = true;
            std::mem::take(&mut guard.hooks)
        };
        for hook in hooks {
            hook();
        }
        true
    }
}

/// Output side of a stream
pub(crate) struct Sinks {
    name: String,
    subscribers: RwLock<Vec<Subscriber>>,
    error_handlers: RwLock<Vec<ErrorCallback>>,
    consumer_hooks: Mutex<HookList>,
    completion_hooks: Mutex<HookList>,
    consumer_closed: watch::Sender<bool>,
    completed: watch::Sender<bool>,
}

impl Sinks {
    pub(crate) fn new<S: Into<String>>(name: S) -> Self {
        let (consumer_closed, _) = watch::channel(false);
        let (completed, _) = watch::channel(false);
        Self {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
            error_handlers: RwLock::new(Vec::new()),
            consumer_hooks: Mutex::new(HookList::default()),
            completion_hooks: Mutex::new(HookList::default()),
            consumer_closed,
            completed,
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.write().push(subscriber);
    }

    pub(crate) fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.read().clone()
    }

    pub(crate) fn on_error(&self, handler: ErrorCallback) {
        self.error_handlers.write().push(handler);
    }

    pub(crate) fn notify_error(&self, err: &StreamsError) {
        let handlers = self.error_handlers.read().clone();
        if handlers.is_empty() {
            error!(stream = %self.name, error = %err, "unhandled stream error");
        }
        for handler in handlers {
            handler(err);
        }
    }

    /// Error callback forwarding to this stream's handlers
    pub(crate) fn error_callback(self: &Arc<Self>) -> ErrorCallback {
        let sinks = Arc::clone(self);
        Arc::new(move |err: &StreamsError| sinks.notify_error(err))
    }

    /// Run `hook` once the consumer side closes (immediately if it already has)
    pub(crate) fn on_consumer_closed(&self, hook: Hook) {
        HookList::register(&self.consumer_hooks, hook);
    }

    /// Run `hook` once the stream completes (immediately if it already has)
    pub(crate) fn on_complete(&self, hook: Hook) {
        HookList::register(&self.completion_hooks, hook);
    }

    pub(crate) fn close_consumer(&self) {
        if HookList::fire(&self.consumer_hooks) {
            self.consumer_closed.send_replace(true);
        }
    }

    pub(crate) fn complete(&self) {
        self.close_consumer();
        if HookList::fire(&self.completion_hooks) {
            self.completed.send_replace(true);
        }
    }

    pub(crate) fn is_consumer_closed(&self) -> bool {
        *self.consumer_closed.borrow()
    }

    pub(crate) fn is_completed(&self) -> bool {
        *self.completed.borrow()
    }

    pub(crate) fn wait_consumer_closed(&self) -> BoxFuture<'static, ()> {
        wait_for_flag(self.consumer_closed.subscribe())
    }

    pub(crate) fn wait_completed(&self) -> BoxFuture<'static, ()> {
        wait_for_flag(self.completed.subscribe())
    }
}

fn wait_for_flag(mut rx: watch::Receiver<bool>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let _ = rx.wait_for(|flag| *flag).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_chain_merge_point_and_signals() {
        let chain = Chain::new();
        let mut changes = chain.changes();
        chain.push(Stage::take(1));
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();
        let head = TerminationSignal::new();
        chain.push(Stage::until(head.clone()));
        chain.insert(1, Stage::skip(1));
        chain.freeze_head();
        chain.push(Stage::until(TerminationSignal::new()));

        assert_eq!(chain.len(), 4);
        assert_eq!(chain.merge_point(), Some(3));

        changes.mark_unchanged();
        chain.push_head(Stage::take(5));
        assert!(changes.has_changed().unwrap());
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.merge_point(), Some(4));
        assert!(matches!(
            chain.snapshot().0[3].as_ref(),
            Stage::Take { limit: 5, .. }
        ));

        let (head_signals, tail_signals) = chain.signals();
        assert_eq!(head_signals.len(), 1);
        assert_eq!(tail_signals.len(), 1);

        head.fire();
        assert!(head_signals[0].is_fired());
        assert!(!tail_signals[0].is_fired());
    }

    #[tokio::test]
    async fn test_hooks_fire_once_and_late_hooks_run_immediately() {
        let sinks = Sinks::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        sinks.on_complete(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sinks.complete();
        sinks.complete();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sinks.is_consumer_closed());
        assert!(sinks.is_completed());

        let counter = calls.clone();
        sinks.on_complete(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::timeout(Duration::from_millis(100), sinks.wait_completed())
            .await
            .expect("completion resolves");
    }

    #[test]
    fn test_notify_error_reaches_all_handlers() {
        let sinks = Arc::new(Sinks::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = calls.clone();
            sinks.on_error(Arc::new(move |_e: &StreamsError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let callback = sinks.error_callback();
        callback(&StreamsError::Unexpected("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
