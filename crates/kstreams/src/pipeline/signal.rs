//! One-shot termination signals used by `until` stages

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A one-shot flag that can be awaited.
///
/// Cloning shares the flag. Once fired it stays fired.
#[derive(Debug, Clone)]
pub struct TerminationSignal {
    tx: Arc<watch::Sender<bool>>,
    delay: Option<Duration>,
    armed: Arc<AtomicBool>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            delay: None,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A signal that has already fired
    pub fn fired_now() -> Self {
        let signal = Self::new();
        signal.fire();
        signal
    }

    /// A signal that fires on its own `delay` after it is first awaited.
    ///
    /// The timer is started by [`fired`](Self::fired), so building one needs
    /// no runtime.
    pub fn after(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn arm(&self) {
        let Some(delay) = self.delay else {
            return;
        };
        if self.armed.swap(true, Ordering::SeqCst) || self.is_fired() {
            return;
        }

        let timer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(delay_ms = delay.as_millis() as u64, "termination signal fired");
            timer.fire();
        });
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired, starting a pending timer
    pub async fn fired(&self) {
        self.arm();
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_fire() {
        let signal = TerminationSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_fired());

        signal.fire();
        assert!(observer.is_fired());
        tokio::time::timeout(Duration::from_millis(100), observer.fired())
            .await
            .expect("fired signal resolves");
    }

    #[tokio::test]
    async fn test_delayed_fire() {
        let signal = TerminationSignal::after(Duration::from_millis(20));
        assert!(!signal.is_fired());
        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .expect("timer fires");
        assert!(signal.is_fired());
    }

    #[test]
    fn test_delayed_signal_built_outside_runtime() {
        let signal = TerminationSignal::after(Duration::from_millis(5));
        assert!(!signal.is_fired());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), signal.fired())
                .await
                .expect("timer starts once awaited");
        });
        assert!(signal.is_fired());
    }

    #[test]
    fn test_fired_now() {
        assert!(TerminationSignal::fired_now().is_fired());
    }
}
