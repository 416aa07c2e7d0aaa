//! One-shot completion handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::{DriverError, DriverResult};

/// A one-shot completion handle with separate success/failure resolution.
///
/// Resolves at most once: the first call to [`complete_ok`](Self::complete_ok)
/// or [`complete_err`](Self::complete_err) wins and later calls are no-ops.
/// Any number of clones may [`wait`](Self::wait) on the same signal.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    result: Mutex<Option<DriverResult<()>>>,
    notify: Notify,
}

impl Signal {
    /// An unresolved signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                result: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve successfully. No-op if already resolved.
    pub fn complete_ok(&self) {
        self.complete(Ok(()));
    }

    /// Resolve with an error. No-op if already resolved.
    pub fn complete_err(&self, error: DriverError) {
        self.complete(Err(error));
    }

    fn complete(&self, result: DriverResult<()>) {
        let mut slot = self.inner.result.lock();
        if slot.is_none() {
            *slot = Some(result);
            drop(slot);
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has resolved.
    pub fn is_done(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    /// The resolution, if any, without waiting.
    pub fn try_result(&self) -> Option<DriverResult<()>> {
        self.inner.result.lock().clone()
    }

    /// Wait until the signal resolves.
    pub async fn wait(&self) -> DriverResult<()> {
        loop {
            // register before checking, so a resolution between the check and
            // the await still wakes us
            let notified = self.inner.notify.notified();
            if let Some(result) = self.inner.result.lock().clone() {
                return result;
            }
            notified.await;
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("result", &self.try_result())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_once() {
        let signal = Signal::new();
        assert!(!signal.is_done());

        signal.complete_ok();
        signal.complete_err(DriverError::connection("too late"));

        assert!(signal.is_done());
        assert_eq!(signal.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_failure_resolution() {
        let signal = Signal::new();
        signal.complete_err(DriverError::connection("boom"));
        signal.complete_ok();

        assert_eq!(signal.wait().await, Err(DriverError::connection("boom")));
    }

    #[tokio::test]
    async fn test_multiple_waiters() {
        let signal = Signal::new();
        let a = signal.clone();
        let b = signal.clone();

        let waiter_a = tokio::spawn(async move { a.wait().await });
        let waiter_b = tokio::spawn(async move { b.wait().await });
        tokio::task::yield_now().await;

        signal.complete_ok();

        assert_eq!(waiter_a.await.unwrap(), Ok(()));
        assert_eq!(waiter_b.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_wait_after_resolution() {
        let signal = Signal::new();
        signal.complete_ok();
        // late waiters observe the stored result
        assert_eq!(signal.wait().await, Ok(()));
        assert_eq!(signal.try_result(), Some(Ok(())));
    }
}
