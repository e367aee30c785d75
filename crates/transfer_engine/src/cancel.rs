use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::TransferError;

/// Owns the abort signal of one popup's current transfer.
///
/// Cancellation is asymmetric. For uploads it aborts in-flight requests and
/// prevents any further chunk, validate or commit call. For pack jobs nothing
/// is sent to the server: the job keeps running and the popup only stops
/// listening, so a later start-or-fetch can pick up the finished artifact.
#[derive(Debug, Default)]
pub struct CancellationController {
    current: Option<CancellationToken>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh signal. A previously issued one is cancelled first so a
    /// stale session can never outlive its replacement.
    pub fn acquire(&mut self) -> AbortSignal {
        self.cancel();
        let token = CancellationToken::new();
        self.current = Some(token.clone());
        AbortSignal { token }
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for CancellationController {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// A signal nobody can fire.
    pub fn never() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `future` until it finishes or the signal fires; the future is
    /// dropped on abort, which also drops any request it had in flight.
    pub async fn guard<F>(&self, future: F) -> Result<F::Output, TransferError>
    where
        F: Future,
    {
        if self.is_aborted() {
            return Err(TransferError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransferError::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration` unless aborted first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), TransferError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn acquire_replaces_and_cancels_previous_signal() {
        let mut controller = CancellationController::new();
        let first = controller.acquire();
        let second = controller.acquire();
        assert!(first.is_aborted());
        assert!(!second.is_aborted());
        controller.cancel();
        assert!(second.is_aborted());
        assert!(!controller.is_armed());
    }

    #[test]
    fn dropping_controller_fires_signal() {
        let signal = {
            let mut controller = CancellationController::new();
            controller.acquire()
        };
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn guard_stops_pending_future() {
        let mut controller = CancellationController::new();
        let signal = controller.acquire();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(30)).await }
        });
        tokio::task::yield_now().await;
        controller.cancel();
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(TransferError::Cancelled));
    }
}
