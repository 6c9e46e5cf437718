use crate::core::{MergeError, MergePhase, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation flag for a merge run.
///
/// Cancelling aborts the in-flight remote calls of the current phase and
/// stops the run before the next phase starts.
#[derive(Debug)]
pub struct MergeCancellation {
    tx: watch::Sender<bool>,
}

impl Default for MergeCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeCancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Observer side handed to the orchestrator and validator.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested. Pends forever if the owner
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Wraps every remote call with the per-call budget and the cancel signal.
#[derive(Debug, Clone)]
pub(crate) struct CallGuard {
    timeout: Option<Duration>,
    cancel: CancelSignal,
}

impl CallGuard {
    pub(crate) fn new(timeout: Option<Duration>, cancel: CancelSignal) -> Self {
        Self { timeout, cancel }
    }

    /// Fails with `Cancelled` if cancellation was already requested.
    pub(crate) fn check(&self, phase: MergePhase) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MergeError::Cancelled { phase })
        } else {
            Ok(())
        }
    }

    pub(crate) async fn run<T, F>(&self, phase: MergePhase, node: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(MergeError::Timeout {
                        phase,
                        node: node.to_string(),
                        after_ms: limit.as_millis() as u64,
                    }),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MergeError::Cancelled { phase }),
            result = bounded => result.map_err(|err| err.in_phase(phase, node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_guard_times_out_slow_calls() {
        let guard = CallGuard::new(Some(Duration::from_millis(20)), CancelSignal::never());
        let err = guard
            .run(MergePhase::Export, "db-1", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::Timeout {
                phase: MergePhase::Export,
                node: "db-1".to_string(),
                after_ms: 20,
            }
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_call() {
        let owner = MergeCancellation::new();
        let guard = CallGuard::new(None, owner.signal());
        let pending = guard.run(MergePhase::Import, "db-2", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        });
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            owner.cancel();
        };
        let (result, ()) = tokio::join!(pending, cancel);
        assert_eq!(
            result.unwrap_err(),
            MergeError::Cancelled {
                phase: MergePhase::Import
            }
        );
        assert!(guard.check(MergePhase::Transfer).is_err());
    }

    #[tokio::test]
    async fn dropped_owner_never_cancels() {
        let signal = MergeCancellation::new().signal();
        let guard = CallGuard::new(None, signal);
        let value = guard
            .run(MergePhase::Transfer, "db-3", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
