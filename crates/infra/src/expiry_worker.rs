//! Background worker that expires lapsed reservations and sweeps stale locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use forgeerp_locking::LockManager;
use forgeerp_reservations::ReservationLedger;

#[derive(Debug, Clone)]
pub struct ExpiryWorkerConfig {
    /// Wait before the first sweep.
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for ExpiryWorkerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(60),
        }
    }
}

impl ExpiryWorkerConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Periodically moves lapsed pending reservations to `Expired`.
///
/// Lapsed reservations already stop counting against stock the moment they
/// pass their expiry; the sweep only makes the status visible and frees
/// their external references.
pub struct ExpiryWorker {
    ledger: Arc<ReservationLedger>,
    locks: Arc<LockManager>,
    config: ExpiryWorkerConfig,
}

/// Handle to stop a running [`ExpiryWorker`].
#[derive(Debug)]
pub struct ExpiryWorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ExpiryWorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A sweep already in progress finishes first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "reservation expiry worker panicked");
        }
    }
}

impl ExpiryWorker {
    pub fn new(ledger: Arc<ReservationLedger>, locks: Arc<LockManager>, config: ExpiryWorkerConfig) -> Self {
        Self { ledger, locks, config }
    }

    /// Run one sweep. Returns how many reservations were expired.
    pub async fn run_once(&self) -> usize {
        let swept_locks = self.locks.sweep_expired();
        if swept_locks > 0 {
            tracing::debug!(swept_locks, "dropped expired stock locks");
        }

        match self.ledger.expire_reservations().await {
            Ok(expired) => expired,
            Err(err) => {
                tracing::warn!(error = %err, code = %err.code(), "reservation expiry sweep failed");
                0
            }
        }
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn start(self) -> ExpiryWorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::info!(
                initial_delay_ms = self.config.initial_delay.as_millis() as u64,
                interval_ms = self.config.interval.as_millis() as u64,
                "reservation expiry worker started"
            );

            tokio::select! {
                _ = signal.notified() => {
                    tracing::info!("reservation expiry worker stopped before first sweep");
                    return;
                }
                _ = tokio::time::sleep(self.config.initial_delay) => {}
            }

            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::info!("reservation expiry worker received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            tracing::info!("reservation expiry worker stopped");
        });

        ExpiryWorkerHandle { shutdown, join }
    }
}
