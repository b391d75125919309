//! Startup discovery.
//!
//! Enumerates every user account in bounded pages, derives each owner's sub-account
//! identity and seeds the tier store with an initial evaluation.

use liquidator_chain::AccountEnumerator;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::account::{AccountIdentity, Bucket, TrackedAccount};
use crate::config::config;
use crate::error::MonitorError;
use crate::fetcher::{BatchedFetcher, ChunkItem};
use crate::liquidator::LiquidationTrigger;
use crate::scheduler::{place, Placement};
use crate::tier_store::{TierStats, TierStore};

/// Discovery configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Accounts per enumeration window
    pub page_size: usize,
    /// Safety cap on windows
    pub max_pages: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let cfg = &config().discovery;
        Self {
            page_size: cfg.page_size,
            max_pages: cfg.max_pages,
        }
    }
}

/// Why enumeration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    LastPage,
    /// A previously seen account came back
    Repeated,
    PageCap,
}

#[derive(Debug, Clone)]
pub struct DiscoverySummary {
    pub pages: usize,
    pub accounts: usize,
    pub stop: StopReason,
    pub liquidations_queued: usize,
    /// Seeded into the high bucket without a snapshot, evaluated on the next tick
    pub unevaluated: usize,
    pub stats: TierStats,
}

/// One-shot population of the tier store.
pub struct Discovery {
    enumerator: Arc<dyn AccountEnumerator>,
    fetcher: Arc<BatchedFetcher>,
    store: Arc<TierStore>,
    trigger: Arc<LiquidationTrigger>,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        enumerator: Arc<dyn AccountEnumerator>,
        fetcher: Arc<BatchedFetcher>,
        store: Arc<TierStore>,
        trigger: Arc<LiquidationTrigger>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            enumerator,
            fetcher,
            store,
            trigger,
            config,
        }
    }

    /// Enumerate, evaluate and seed every account.
    ///
    /// A blob that fails to decode aborts discovery. Accounts whose round trip or
    /// evaluation failed are seeded into the high bucket so the first ticks pick them up.
    #[instrument(skip(self))]
    pub async fn discover_all(&self) -> Result<DiscoverySummary, MonitorError> {
        let start = Instant::now();
        let (identities, pages, stop) = self.enumerate().await?;
        info!(
            accounts = identities.len(),
            pages,
            stop = ?stop,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Accounts enumerated"
        );

        let mut liquidations_queued = 0;
        let mut unevaluated = 0;

        for chunk in self.fetcher.fetch_and_evaluate(&identities).await {
            let items = match chunk.items {
                Ok(items) => items,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        chunk = chunk.index,
                        accounts = chunk.identities.len(),
                        error = %e,
                        "Initial fetch failed, seeding chunk unevaluated"
                    );
                    for identity in chunk.identities {
                        self.seed_unevaluated(identity);
                        unevaluated += 1;
                    }
                    continue;
                }
            };

            for item in items {
                match item {
                    ChunkItem::Evaluated { account, tier } => {
                        let placement = place(&self.store, &self.trigger, account, tier);
                        if placement == Placement::Liquidated {
                            liquidations_queued += 1;
                        }
                    }
                    ChunkItem::Missing { identity } => {
                        debug!(authority = %identity.authority, "Account closed during discovery");
                    }
                    ChunkItem::Failed { error, .. } if error.is_fatal() => {
                        error!(error = %error, "Undecodable account during discovery");
                        return Err(error);
                    }
                    ChunkItem::Failed { identity, error } => {
                        warn!(
                            authority = %identity.authority,
                            error = %error,
                            "Initial evaluation failed"
                        );
                        self.seed_unevaluated(identity);
                        unevaluated += 1;
                    }
                }
            }
        }

        let summary = DiscoverySummary {
            pages,
            accounts: identities.len(),
            stop,
            liquidations_queued,
            unevaluated,
            stats: self.store.stats(),
        };
        info!(
            accounts = summary.accounts,
            high = summary.stats.high_count,
            medium = summary.stats.medium_count,
            low = summary.stats.low_count,
            liquidations = summary.liquidations_queued,
            unevaluated = summary.unevaluated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Discovery complete"
        );
        Ok(summary)
    }

    async fn enumerate(&self) -> Result<(Vec<AccountIdentity>, usize, StopReason), MonitorError> {
        let mut seen = HashSet::new();
        let mut identities = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        let stop = loop {
            if pages >= self.config.max_pages {
                warn!(max_pages = self.config.max_pages, "Discovery page cap reached");
                break StopReason::PageCap;
            }

            let page = self
                .enumerator
                .users_page(cursor.as_deref(), self.config.page_size)
                .await?;
            pages += 1;

            let mut repeated = false;
            for discovered in page.users {
                let authority = discovered.user.authority;
                if !seen.insert(authority) {
                    repeated = true;
                    continue;
                }
                let user_account = self.enumerator.user_account_address(&authority);
                if user_account != discovered.address {
                    warn!(
                        authority = %authority,
                        derived = %user_account,
                        found = %discovered.address,
                        "User account is not at its derived address, using the enumerated one"
                    );
                }
                identities.push(AccountIdentity {
                    authority,
                    user_account: discovered.address,
                    positions_account: discovered.user.positions,
                });
            }
            debug!(page = pages, total = identities.len(), "Enumerated page");

            if repeated {
                break StopReason::Repeated;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break StopReason::LastPage,
            }
        };

        Ok((identities, pages, stop))
    }

    fn seed_unevaluated(&self, identity: AccountIdentity) {
        self.store.upsert(Bucket::High, TrackedAccount::unevaluated(identity));
    }
}
