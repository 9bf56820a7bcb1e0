//! Periodic background flushing for stores that buffer writes in memory.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Repeatedly sleeps for `interval` then runs `tick`, until `cancel` fires.
/// Errors returned by `tick` are logged and otherwise swallowed — a failed
/// flush is retried on the next tick rather than taking the store down.
pub struct PeriodicFlusher {
    interval: Duration,
    cancel: CancellationToken,
}

impl PeriodicFlusher {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub async fn run<F, Fut, E>(self, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("periodic flusher stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(err) = tick().await {
                        tracing::warn!(%err, "periodic flush failed, will retry next tick");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn runs_until_cancelled() {
        let cancel = CancellationToken::new();
        let flusher = PeriodicFlusher::new(Duration::from_millis(10), cancel.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let handle = tokio::spawn(flusher.run(move || {
            count2.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), std::io::Error>(()) }
        }));

        tokio::time::advance(Duration::from_millis(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
