//! Liquidation trigger.
//!
//! Removes a liquidatable account from monitoring and hands it to the executor
//! without blocking the caller. Submissions run as detached tasks; [`LiquidationTrigger::drain`]
//! awaits whatever is still in flight at shutdown.

use liquidator_chain::LiquidationExecutor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::account::{AccountIdentity, MarginRatio};
use crate::tier_store::TierStore;

/// Submission counters.
#[derive(Debug, Default)]
pub struct LiquidationStats {
    pub attempted: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl LiquidationStats {
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Fires liquidations for accounts at or below the liquidation ratio.
pub struct LiquidationTrigger {
    executor: Arc<dyn LiquidationExecutor>,
    store: Arc<TierStore>,
    in_flight: Mutex<JoinSet<()>>,
    stats: Arc<LiquidationStats>,
}

impl LiquidationTrigger {
    pub fn new(executor: Arc<dyn LiquidationExecutor>, store: Arc<TierStore>) -> Self {
        Self {
            executor,
            store,
            in_flight: Mutex::new(JoinSet::new()),
            stats: Arc::new(LiquidationStats::default()),
        }
    }

    /// Stop tracking `identity` and submit its liquidation in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fire(&self, identity: AccountIdentity, ratio: MarginRatio) {
        self.store.remove(&identity.authority);
        self.stats.attempted.fetch_add(1, Ordering::Relaxed);

        info!(
            authority = %identity.authority,
            user_account = %identity.user_account,
            ratio = %ratio,
            "Liquidating account"
        );

        let executor = self.executor.clone();
        let stats = self.stats.clone();
        let mut in_flight = self.in_flight.lock();
        // Reap finished submissions so the set only holds live tasks
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            let start = Instant::now();
            match executor
                .liquidate(&identity.user_account, &identity.positions_account)
                .await
            {
                Ok(signature) => {
                    stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        authority = %identity.authority,
                        user_account = %identity.user_account,
                        signature = %signature,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Liquidation submitted"
                    );
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        authority = %identity.authority,
                        user_account = %identity.user_account,
                        error = %e,
                        "Liquidation failed"
                    );
                }
            }
        });
    }

    /// Number of submissions not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn stats(&self) -> &LiquidationStats {
        &self.stats
    }

    /// Await every outstanding submission.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock());
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Waiting for in-flight liquidations");
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Liquidation task aborted");
            }
        }
    }
}
