//! Bounded candidate gathering.
//!
//! Gathering every candidate can take seconds on constrained networks, while
//! a partial set is enough to start connecting and keeps the QR code small.
//! The wait is a race between the transport reporting "complete" and a timer.

use crate::logger::log;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringOutcome {
    Complete,
    TimedOut,
}

struct WaitInner {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<GatheringOutcome>>>,
}

/// Single-resolution handle. Cloned into every party of the race; the first
/// `resolve` wins and every later one is a no-op.
#[derive(Clone)]
pub struct GatheringWait {
    inner: Arc<WaitInner>,
}

/// Receiving half, awaited by the negotiating session
pub type GatheringDone = oneshot::Receiver<GatheringOutcome>;

impl GatheringWait {
    pub fn new() -> (Self, GatheringDone) {
        let (tx, rx) = oneshot::channel();
        let wait = Self {
            inner: Arc::new(WaitInner {
                resolved: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (wait, rx)
    }

    /// Returns `true` only for the call that actually resolved the wait
    pub fn resolve(&self, outcome: GatheringOutcome) -> bool {
        if self.inner.resolved.swap(true, Ordering::AcqRel) {
            log(&format!(
                "Gathering wait already resolved, ignoring {:?}",
                outcome
            ));
            return false;
        }
        let tx = match self.inner.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = tx {
            // the waiter may be gone already; nothing left to notify then
            let _ = tx.send(outcome);
        }
        log(&format!("Gathering wait resolved: {:?}", outcome));
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Starts the timer half of the race. The task is never cancelled; once
    /// the event wins, its resolution is simply discarded.
    pub fn arm_timeout(&self, timeout: Duration) -> JoinHandle<bool> {
        let wait = self.clone();
        tokio::spawn(async move {
            sleep(timeout).await;
            let won = wait.resolve(GatheringOutcome::TimedOut);
            if won {
                log(&format!(
                    "Candidate gathering timeout after {} ms, continuing with partial candidates",
                    timeout.as_millis()
                ));
            }
            won
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_resolution_wins() {
        let (wait, done) = GatheringWait::new();
        assert!(wait.resolve(GatheringOutcome::Complete));
        assert!(!wait.resolve(GatheringOutcome::TimedOut));
        assert_eq!(done.await.unwrap(), GatheringOutcome::Complete);
    }

    #[tokio::test]
    async fn late_gathering_complete_is_noop_after_timeout() {
        let (wait, done) = GatheringWait::new();
        let timer = wait.arm_timeout(Duration::from_millis(10));
        assert_eq!(done.await.unwrap(), GatheringOutcome::TimedOut);
        assert!(timer.await.unwrap());

        assert!(wait.is_resolved());
        assert!(!wait.resolve(GatheringOutcome::Complete));
    }

    #[tokio::test]
    async fn timer_losing_the_race_is_discarded() {
        let (wait, done) = GatheringWait::new();
        let timer = wait.arm_timeout(Duration::from_millis(20));
        assert!(wait.resolve(GatheringOutcome::Complete));
        assert_eq!(done.await.unwrap(), GatheringOutcome::Complete);
        assert!(!timer.await.unwrap());
    }

    #[tokio::test]
    async fn resolve_without_waiter_does_not_panic() {
        let (wait, done) = GatheringWait::new();
        drop(done);
        assert!(wait.resolve(GatheringOutcome::TimedOut));
    }
}
