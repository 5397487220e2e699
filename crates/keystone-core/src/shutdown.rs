//! Cooperative stop signal shared by background loops.
//!
//! A loop checks [`StopSignal::is_stop_requested`] at the top of each pass
//! and idles through [`StopSignal::sleep_or_stop`], which wakes early once
//! [`StopSignal::request_stop`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Shared stop flag plus a wake-up for sleeping loops.
///
/// Wrap in [`Arc`](std::sync::Arc) to share between the owner and its
/// tasks.
#[derive(Debug, Default)]
pub struct StopSignal {
    stop_requested: AtomicBool,
    wake: Notify,
}

impl StopSignal {
    /// Create a signal with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that all loops observing this signal exit.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `true` if the loop should keep running.
    pub async fn sleep_or_stop(&self, duration: Duration) -> bool {
        // Register before checking the flag so a concurrent request_stop
        // cannot slip between the check and the wait.
        let notified = self.wake.notified();
        if self.is_stop_requested() {
            return false;
        }
        tokio::select! {
            () = notified => false,
            () = tokio::time::sleep(duration) => !self.is_stop_requested(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_running() {
        let signal = StopSignal::new();
        assert!(!signal.is_stop_requested());
        signal.request_stop();
        assert!(signal.is_stop_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_stop() {
        let signal = StopSignal::new();
        assert!(signal.sleep_or_stop(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn stop_wakes_a_sleeper() {
        let signal = Arc::new(StopSignal::new());
        let sleeper = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.sleep_or_stop(Duration::from_secs(3600)).await })
        };
        tokio::task::yield_now().await;
        signal.request_stop();

        let keep_running = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .ok()
            .and_then(Result::ok);
        assert_eq!(keep_running, Some(false));
    }

    #[tokio::test]
    async fn sleep_after_stop_returns_immediately() {
        let signal = StopSignal::new();
        signal.request_stop();
        assert!(!signal.sleep_or_stop(Duration::from_secs(3600)).await);
    }
}
