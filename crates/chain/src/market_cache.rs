//! Market reference data cache.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{ChainError, ChainResult};
use crate::exchange::{layout, MarketLookup, MarketSnapshot};
use crate::rpc::{AccountsRpc, Commitment};

/// Latest known state of every initialized market.
#[derive(Default)]
pub struct MarketCache {
    markets: DashMap<u64, MarketSnapshot>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite cached markets with `snapshots`.
    pub fn apply(&self, snapshots: impl IntoIterator<Item = MarketSnapshot>) {
        for snapshot in snapshots {
            self.markets.insert(snapshot.market_index, snapshot);
        }
        *self.last_refresh.write() = Some(Utc::now());
    }

    /// Re-read the markets account.
    #[instrument(skip(self, rpc), fields(markets = %markets_address))]
    pub async fn refresh(
        &self,
        rpc: &dyn AccountsRpc,
        markets_address: &Pubkey,
        commitment: Commitment,
    ) -> ChainResult<usize> {
        let data = rpc
            .get_account(markets_address, commitment)
            .await?
            .ok_or(ChainError::AccountNotFound(*markets_address))?;
        let snapshots = layout::decode_markets(markets_address, &data)?;
        let count = snapshots.len();
        self.apply(snapshots);

        debug!(count, "Markets refreshed");
        Ok(count)
    }

    /// Refresh every `interval` until `shutdown` flips to true.
    ///
    /// Failed refreshes are logged and the previous snapshots stay in place.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        rpc: Arc<dyn AccountsRpc>,
        markets_address: Pubkey,
        commitment: Commitment,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_ms = interval.as_millis() as u64, "Market refresh loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh(rpc.as_ref(), &markets_address, commitment).await {
                        warn!(error = %e, "Market refresh failed, keeping previous snapshots");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Market refresh loop stopped");
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }
}

impl MarketLookup for MarketCache {
    fn market(&self, market_index: u64) -> Option<MarketSnapshot> {
        self.markets.get(&market_index).map(|m| *m)
    }
}
