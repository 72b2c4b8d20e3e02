//! Periodic purge of expired revocation records, off the request path.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::revocation::RevocationService;

pub struct RevocationSweeper {
    revocations: RevocationService,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl RevocationSweeper {
    pub fn new(revocations: RevocationService, interval: Duration) -> Self {
        Self {
            revocations,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the loop once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting revocation sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Revocation sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.revocations.sweep_expired().await {
                            tracing::error!(error = %e, "Revocation sweep failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenClass;
    use crate::services::MemoryStore;
    use crate::utils::{Clock, MockClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweeps_then_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::default());
        let revocations = RevocationService::new(store.clone(), clock.clone());
        revocations
            .revoke(
                "old",
                TokenClass::Access,
                None,
                Some(clock.now() - chrono::Duration::minutes(1)),
                None,
            )
            .await
            .unwrap();

        let sweeper = RevocationSweeper::new(revocations, Duration::from_millis(10));
        let token = sweeper.shutdown_token();
        let handle = sweeper.start();

        for _ in 0..50 {
            if store.revocation_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.revocation_count().unwrap(), 0);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
