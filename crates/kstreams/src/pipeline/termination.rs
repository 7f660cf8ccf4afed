//! Termination policies bounding an otherwise infinite consumption

use std::time::Duration;
use tracing::debug;

use crate::pipeline::signal::TerminationSignal;
use crate::pipeline::stage::Stage;

/// Default duration of a time-boxed policy
pub const DEFAULT_CONSUME_DURATION: Duration = Duration::from_millis(1000);

/// Default element count of a count-boxed policy
pub const DEFAULT_CONSUME_COUNT: u64 = 1000;

/// How a stream's consumption is bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Stop once a wall-clock delay has elapsed
    Time(Duration),
    /// Stop after N messages pass the point the policy is applied at
    Count(u64),
    /// Stop at the broker high-water mark. Accepted but never triggers.
    LatestOffset,
}

impl TerminationPolicy {
    /// The stage enforcing this policy, appended at the current chain tail.
    ///
    /// The time-boxed timer starts counting once the run loop watches it.
    /// A zero count yields an already fired `until`.
    pub fn into_stage(self) -> Option<Stage> {
        match self {
            TerminationPolicy::Time(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "time-boxed consumption");
                Some(Stage::until(TerminationSignal::after(delay)))
            }
            TerminationPolicy::Count(0) => {
                debug!("count-boxed consumption with zero count");
                Some(Stage::until(TerminationSignal::fired_now()))
            }
            TerminationPolicy::Count(count) => {
                debug!(count, "count-boxed consumption");
                Some(Stage::take(count))
            }
            TerminationPolicy::LatestOffset => {
                debug!("offset-boxed consumption has no bounding stage");
                None
            }
        }
    }
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        TerminationPolicy::Time(DEFAULT_CONSUME_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_stages() {
        assert!(matches!(
            TerminationPolicy::Count(3).into_stage(),
            Some(Stage::Take { limit: 3, .. })
        ));
        assert!(matches!(
            TerminationPolicy::Time(Duration::from_millis(10)).into_stage(),
            Some(Stage::Until(_))
        ));
        assert!(TerminationPolicy::LatestOffset.into_stage().is_none());

        match TerminationPolicy::Count(0).into_stage() {
            Some(Stage::Until(signal)) => assert!(signal.is_fired()),
            other => panic!("unexpected stage: {other:?}"),
        }
        assert_eq!(
            TerminationPolicy::default(),
            TerminationPolicy::Time(DEFAULT_CONSUME_DURATION)
        );
    }
}
