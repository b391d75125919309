//! Tick-driven refresh loop.
//!
//! Each tick refreshes exactly one bucket, chosen from the tick counter so that
//! riskier buckets are re-read far more often than safe ones.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::account::{Bucket, MarginRatio, Tier, TrackedAccount};
use crate::config::config;
use crate::fetcher::{BatchedFetcher, ChunkItem};
use crate::liquidator::LiquidationTrigger;
use crate::tier_store::TierStore;

/// Scheduler configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between ticks
    pub pacing: Duration,
    pub medium_every: u64,
    pub low_every: u64,
    /// Tier statistics cadence
    pub stats_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cfg = &config().scheduler;
        Self {
            pacing: cfg.pacing(),
            medium_every: cfg.medium_every_ticks,
            low_every: cfg.low_every_ticks,
            stats_every: cfg.stats_every_ticks,
        }
    }
}

impl SchedulerConfig {
    /// Bucket refreshed on `tick`; the first matching rule wins.
    pub fn select_bucket(&self, tick: u64) -> Bucket {
        if tick > 0 && tick % self.low_every == 0 {
            Bucket::Low
        } else if tick > 0 && tick % self.medium_every == 0 {
            Bucket::Medium
        } else {
            Bucket::High
        }
    }
}

/// What happened to an account after a fresh evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Liquidated,
    Moved { from: Option<Bucket>, to: Bucket },
    Unchanged(Bucket),
}

/// Store a freshly evaluated account in its bucket, or liquidate it.
pub(crate) fn place(
    store: &TierStore,
    trigger: &LiquidationTrigger,
    account: TrackedAccount,
    tier: Tier,
) -> Placement {
    let Some(bucket) = tier.bucket() else {
        trigger.fire(account.identity, account.ratio.unwrap_or(MarginRatio(0)));
        return Placement::Liquidated;
    };
    match store.upsert(bucket, account) {
        Some(from) if from == bucket => Placement::Unchanged(bucket),
        from => Placement::Moved { from, to: bucket },
    }
}

/// Summary of one bucket refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub requested: usize,
    pub evaluated: usize,
    pub moved: usize,
    pub liquidated: usize,
    /// Accounts closed on the ledger and dropped
    pub removed: usize,
    /// Accounts whose blob failed to decode or evaluate
    pub failed_accounts: usize,
    /// Chunks whose round trip failed
    pub failed_chunks: usize,
}

/// Refresh loop over the tier store.
pub struct Scheduler {
    store: Arc<TierStore>,
    fetcher: Arc<BatchedFetcher>,
    trigger: Arc<LiquidationTrigger>,
    config: SchedulerConfig,
    tick: u64,
}

impl Scheduler {
    pub fn new(
        store: Arc<TierStore>,
        fetcher: Arc<BatchedFetcher>,
        trigger: Arc<LiquidationTrigger>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            trigger,
            config,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Re-fetch every account in `bucket` and reclassify it.
    ///
    /// Round-trip failures leave the chunk's accounts where they were with their old snapshot.
    #[instrument(skip(self), fields(tick = self.tick))]
    pub async fn refresh(&self, bucket: Bucket) -> RefreshOutcome {
        let identities = self.store.keys_of(bucket);
        let mut outcome = RefreshOutcome {
            requested: identities.len(),
            ..Default::default()
        };
        if identities.is_empty() {
            return outcome;
        }

        for chunk in self.fetcher.fetch_and_evaluate(&identities).await {
            let items = match chunk.items {
                Ok(items) => items,
                Err(e) => {
                    outcome.failed_chunks += 1;
                    error!(
                        bucket = %bucket,
                        chunk = chunk.index,
                        accounts = chunk.identities.len(),
                        error = %e,
                        "Chunk refresh failed, keeping previous snapshots"
                    );
                    continue;
                }
            };

            for item in items {
                match item {
                    ChunkItem::Evaluated { account, tier } => {
                        outcome.evaluated += 1;
                        match place(&self.store, &self.trigger, account, tier) {
                            Placement::Liquidated => outcome.liquidated += 1,
                            Placement::Moved { .. } => outcome.moved += 1,
                            Placement::Unchanged(_) => {}
                        }
                    }
                    ChunkItem::Missing { identity } => {
                        outcome.removed += 1;
                        self.store.remove(&identity.authority);
                        info!(authority = %identity.authority, "Account closed, no longer tracked");
                    }
                    ChunkItem::Failed { identity, error } => {
                        outcome.failed_accounts += 1;
                        error!(
                            authority = %identity.authority,
                            error = %error,
                            "Account refresh failed, keeping previous snapshot"
                        );
                    }
                }
            }
        }

        outcome
    }

    /// Run ticks until `shutdown` flips to true.
    ///
    /// The in-flight refresh always completes; shutdown is observed between ticks.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            pacing_ms = self.config.pacing.as_millis() as u64,
            medium_every = self.config.medium_every,
            low_every = self.config.low_every,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let bucket = self.config.select_bucket(self.tick);
            let start = Instant::now();
            let outcome = self.refresh(bucket).await;

            if (outcome.requested > 0 && bucket != Bucket::High)
                || outcome.moved + outcome.liquidated + outcome.failed_chunks > 0
            {
                info!(
                    tick = self.tick,
                    bucket = %bucket,
                    requested = outcome.requested,
                    moved = outcome.moved,
                    liquidated = outcome.liquidated,
                    removed = outcome.removed,
                    failed_chunks = outcome.failed_chunks,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Bucket refreshed"
                );
            } else {
                debug!(
                    tick = self.tick,
                    bucket = %bucket,
                    requested = outcome.requested,
                    "Bucket refreshed"
                );
            }

            if self.tick > 0 && self.tick % self.config.stats_every == 0 {
                self.log_stats();
            }

            self.tick = self.tick.wrapping_add(1);

            tokio::select! {
                _ = tokio::time::sleep(self.config.pacing) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, stopping scheduler");
                        break;
                    }
                }
            }
        }

        info!(ticks = self.tick, "Scheduler stopped");
        self.log_stats();
    }

    fn log_stats(&self) {
        let stats = self.store.stats();
        let liq = self.trigger.stats();
        info!(
            tick = self.tick,
            high = stats.high_count,
            medium = stats.medium_count,
            low = stats.low_count,
            total = stats.total(),
            liquidations_attempted = liq.attempted(),
            liquidations_succeeded = liq.succeeded(),
            liquidations_failed = liq.failed(),
            "Tier stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_fetch_config, test_thresholds, FakeExchange};

    struct Harness {
        exchange: Arc<FakeExchange>,
        store: Arc<TierStore>,
        trigger: Arc<LiquidationTrigger>,
        scheduler: Scheduler,
    }

    fn harness() -> Harness {
        let exchange = Arc::new(FakeExchange::new());
        let store = Arc::new(TierStore::new());
        let fetcher = Arc::new(BatchedFetcher::new(
            exchange.clone(),
            exchange.clone(),
            exchange.clone(),
            test_thresholds(),
            test_fetch_config(),
        ));
        let trigger = Arc::new(LiquidationTrigger::new(exchange.clone(), store.clone()));
        let scheduler = Scheduler::new(
            store.clone(),
            fetcher,
            trigger.clone(),
            SchedulerConfig {
                pacing: Duration::from_millis(100),
                medium_every: 1200,
                low_every: 24000,
                stats_every: 600,
            },
        );
        Harness {
            exchange,
            store,
            trigger,
            scheduler,
        }
    }

    impl Harness {
        /// Track an account at `ratio` in `bucket` without fetching.
        fn seed(&self, bucket: Bucket, ratio: i128) -> crate::account::AccountIdentity {
            let identity = self.exchange.add_account_at_ratio(ratio);
            self.store.upsert(
                bucket,
                TrackedAccount::new(identity, Default::default(), 0, MarginRatio(ratio)),
            );
            identity
        }
    }

    #[test]
    fn test_select_bucket() {
        let config = SchedulerConfig {
            pacing: Duration::from_millis(100),
            medium_every: 1200,
            low_every: 24000,
            stats_every: 600,
        };
        assert_eq!(config.select_bucket(0), Bucket::High);
        for tick in [1, 2, 599, 1199, 1201, 23999] {
            assert_eq!(config.select_bucket(tick), Bucket::High, "tick {tick}");
        }
        assert_eq!(config.select_bucket(1200), Bucket::Medium);
        assert_eq!(config.select_bucket(2400), Bucket::Medium);
        assert_eq!(config.select_bucket(22800), Bucket::Medium);
        assert_eq!(config.select_bucket(24000), Bucket::Low);
        assert_eq!(config.select_bucket(48000), Bucket::Low);
    }

    #[tokio::test]
    async fn test_high_to_liquidate_fires_once() {
        let h = harness();
        let identity = h.seed(Bucket::High, 900);
        h.exchange.set_ratio(&identity, 600);

        let outcome = h.scheduler.refresh(Bucket::High).await;
        assert_eq!(outcome.liquidated, 1);
        assert!(!h.store.contains(&identity.authority));

        // A second refresh no longer sees the account
        let outcome = h.scheduler.refresh(Bucket::High).await;
        assert_eq!(outcome.requested, 0);

        h.trigger.drain().await;
        assert_eq!(h.exchange.liquidations(), vec![identity.user_account]);
        assert_eq!(h.trigger.stats().attempted(), 1);
    }

    #[tokio::test]
    async fn test_reclassification_moves_accounts() {
        let h = harness();
        let improving = h.seed(Bucket::High, 900);
        let steady = h.seed(Bucket::High, 950);
        let worsening = h.seed(Bucket::Low, 5000);
        h.exchange.set_ratio(&improving, 3000);
        h.exchange.set_ratio(&worsening, 1500);

        let outcome = h.scheduler.refresh(Bucket::High).await;
        assert_eq!(outcome.requested, 2);
        assert_eq!(outcome.moved, 1);
        assert_eq!(h.store.tier_of(&improving.authority), Some(Bucket::Low));
        assert_eq!(h.store.tier_of(&steady.authority), Some(Bucket::High));
        // Not refreshed yet
        assert_eq!(h.store.tier_of(&worsening.authority), Some(Bucket::Low));

        h.scheduler.refresh(Bucket::Low).await;
        assert_eq!(h.store.tier_of(&worsening.authority), Some(Bucket::Medium));
        let refreshed = h.store.get(&worsening.authority).and_then(|a| a.ratio);
        assert_eq!(refreshed, Some(MarginRatio(1500)));
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_prior_classification() {
        let h = harness();
        let identities: Vec<_> = (0..250).map(|_| h.seed(Bucket::Medium, 1500)).collect();
        // keys_of order is unspecified, so fail exactly one account's chunk
        let unlucky = identities[42];
        h.exchange.fail_requests_for(&unlucky);
        for identity in &identities {
            h.exchange.set_ratio(identity, 3000);
        }

        let outcome = h.scheduler.refresh(Bucket::Medium).await;
        assert_eq!(h.exchange.batch_sizes().len(), 3);
        assert_eq!(outcome.failed_chunks, 1);

        let stats = h.store.stats();
        let failed_chunk_len = 250 - outcome.evaluated;
        assert!(failed_chunk_len == 100 || failed_chunk_len == 50);
        assert_eq!(stats.medium_count, failed_chunk_len);
        assert_eq!(stats.low_count, outcome.evaluated);
        assert_eq!(h.store.tier_of(&unlucky.authority), Some(Bucket::Medium));
        assert_eq!(h.store.get(&unlucky.authority).and_then(|a| a.ratio), Some(MarginRatio(1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_chunk_keeps_prior_classification() {
        let h = harness();
        let stalled = h.seed(Bucket::Medium, 1500);
        h.exchange.stall_requests_for(&stalled, Duration::from_secs(60));
        h.exchange.set_ratio(&stalled, 3000);

        let outcome = h.scheduler.refresh(Bucket::Medium).await;
        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(outcome.evaluated, 0);
        assert_eq!(h.store.tier_of(&stalled.authority), Some(Bucket::Medium));
        assert_eq!(h.store.get(&stalled.authority).and_then(|a| a.ratio), Some(MarginRatio(1500)));

        // Picked up once the endpoint answers again
        h.exchange.heal();
        let outcome = h.scheduler.refresh(Bucket::Medium).await;
        assert_eq!(outcome.moved, 1);
        assert_eq!(h.store.tier_of(&stalled.authority), Some(Bucket::Low));
    }

    #[tokio::test]
    async fn test_closed_and_corrupt_accounts() {
        let h = harness();
        let closed = h.seed(Bucket::High, 900);
        let corrupt = h.seed(Bucket::High, 900);
        h.exchange.close_account(&closed);
        h.exchange.corrupt(&corrupt.user_account);

        let outcome = h.scheduler.refresh(Bucket::High).await;
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.failed_accounts, 1);
        assert!(!h.store.contains(&closed.authority));
        assert_eq!(h.store.tier_of(&corrupt.authority), Some(Bucket::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let mut h = harness();
        let identity = h.seed(Bucket::High, 900);
        h.exchange.set_ratio(&identity, 500);

        let (tx, rx) = watch::channel(false);
        let trigger = h.trigger.clone();
        let exchange = h.exchange.clone();
        let handle = tokio::spawn(async move {
            h.scheduler.run(rx).await;
            h.scheduler.tick()
        });

        tokio::time::sleep(Duration::from_millis(1050)).await;
        tx.send(true).unwrap();
        let ticks = handle.await.unwrap();
        assert!(ticks >= 10, "ran {ticks} ticks");

        trigger.drain().await;
        assert_eq!(exchange.liquidations().len(), 1);
    }
}
