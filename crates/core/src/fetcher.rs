//! Batched account fetching and evaluation.
//!
//! Identities are split into chunks bounded by the RPC item limit. Each chunk is a
//! single round trip carrying two `getMultipleAccounts` calls (positions accounts and
//! user accounts); all chunks are in flight at once and awaited together.

use futures::future::join_all;
use liquidator_chain::{
    AccountBlob, AccountDecoder, AccountsRpc, ChainError, Commitment, MarketLookup, Pubkey,
    MAX_MULTIPLE_ACCOUNTS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::account::{AccountIdentity, Tier, TrackedAccount};
use crate::config::config;
use crate::error::MonitorError;
use crate::risk::{evaluate, TierThresholds};

/// Fetcher configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Identities per chunk, capped at [`MAX_MULTIPLE_ACCOUNTS`]
    pub chunk_size: usize,
    pub commitment: Commitment,
    /// Deadline for one chunk's round trip
    pub rpc_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let cfg = &config().fetch;
        Self {
            chunk_size: cfg.chunk_size,
            commitment: cfg.commitment,
            rpc_timeout: cfg.rpc_timeout(),
        }
    }
}

impl FetchConfig {
    fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_MULTIPLE_ACCOUNTS)
    }
}

/// Outcome for one identity of a chunk.
#[derive(Debug)]
pub enum ChunkItem {
    /// Fresh snapshot and its classification
    Evaluated { account: TrackedAccount, tier: Tier },
    /// User or positions account no longer exists
    Missing { identity: AccountIdentity },
    /// Blob did not decode or could not be evaluated
    Failed {
        identity: AccountIdentity,
        error: MonitorError,
    },
}

impl ChunkItem {
    pub fn identity(&self) -> &AccountIdentity {
        match self {
            Self::Evaluated { account, .. } => &account.identity,
            Self::Missing { identity } | Self::Failed { identity, .. } => identity,
        }
    }
}

/// Result of one chunk; a failed round trip fails only its own identities.
#[derive(Debug)]
pub struct ChunkResult {
    pub index: usize,
    pub identities: Vec<AccountIdentity>,
    /// Items in request order
    pub items: Result<Vec<ChunkItem>, MonitorError>,
}

/// Fetches positions and collateral in bulk and evaluates risk.
pub struct BatchedFetcher {
    rpc: Arc<dyn AccountsRpc>,
    decoder: Arc<dyn AccountDecoder>,
    markets: Arc<dyn MarketLookup>,
    thresholds: TierThresholds,
    config: FetchConfig,
}

impl BatchedFetcher {
    pub fn new(
        rpc: Arc<dyn AccountsRpc>,
        decoder: Arc<dyn AccountDecoder>,
        markets: Arc<dyn MarketLookup>,
        thresholds: TierThresholds,
        config: FetchConfig,
    ) -> Self {
        Self {
            rpc,
            decoder,
            markets,
            thresholds,
            config,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.effective_chunk_size()
    }

    /// Fetch and evaluate `identities`, one result per chunk in chunk order.
    #[instrument(skip_all, fields(accounts = identities.len()))]
    pub async fn fetch_and_evaluate(&self, identities: &[AccountIdentity]) -> Vec<ChunkResult> {
        let chunks = identities
            .chunks(self.chunk_size())
            .enumerate()
            .map(move |(index, chunk)| async move {
                ChunkResult {
                    index,
                    identities: chunk.to_vec(),
                    items: self.fetch_chunk(chunk).await,
                }
            });
        join_all(chunks).await
    }

    async fn fetch_chunk(&self, chunk: &[AccountIdentity]) -> Result<Vec<ChunkItem>, MonitorError> {
        let positions_keys: Vec<Pubkey> = chunk.iter().map(|i| i.positions_account).collect();
        let user_keys: Vec<Pubkey> = chunk.iter().map(|i| i.user_account).collect();

        let requests: [&[Pubkey]; 2] = [&positions_keys, &user_keys];
        let call = self
            .rpc
            .get_multiple_accounts_batch(&requests, self.config.commitment);
        let mut lists = tokio::time::timeout(self.config.rpc_timeout, call)
            .await
            .map_err(|_| ChainError::Timeout(self.config.rpc_timeout.as_millis() as u64))??;

        if lists.len() != 2 {
            return Err(ChainError::LengthMismatch {
                expected: 2,
                got: lists.len(),
            }
            .into());
        }
        let users = lists.pop().unwrap_or_default();
        let positions = lists.pop().unwrap_or_default();
        for list in [&positions, &users] {
            if list.len() != chunk.len() {
                return Err(ChainError::LengthMismatch {
                    expected: chunk.len(),
                    got: list.len(),
                }
                .into());
            }
        }

        debug!(accounts = chunk.len(), "Chunk fetched");

        Ok(chunk
            .iter()
            .zip(positions)
            .zip(users)
            .map(|((identity, positions_blob), user_blob)| {
                self.evaluate_blobs(*identity, positions_blob, user_blob)
            })
            .collect())
    }

    fn evaluate_blobs(
        &self,
        identity: AccountIdentity,
        positions_blob: AccountBlob,
        user_blob: AccountBlob,
    ) -> ChunkItem {
        let (Some(positions_data), Some(user_data)) = (positions_blob, user_blob) else {
            return ChunkItem::Missing { identity };
        };

        let decoded = self
            .decoder
            .decode_positions(&identity.positions_account, &positions_data)
            .and_then(|positions| {
                let user = self.decoder.decode_user(&identity.user_account, &user_data)?;
                Ok((positions, user.collateral))
            });
        let (positions, collateral) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                return ChunkItem::Failed {
                    identity,
                    error: e.into(),
                }
            }
        };

        match evaluate(&positions, collateral, self.markets.as_ref(), &self.thresholds) {
            Ok(eval) => ChunkItem::Evaluated {
                account: TrackedAccount::new(identity, positions, collateral, eval.ratio),
                tier: eval.tier,
            },
            Err(source) => ChunkItem::Failed {
                identity,
                error: MonitorError::Risk {
                    authority: identity.authority,
                    source,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MarginRatio;
    use crate::test_support::{test_fetch_config, test_thresholds, FakeExchange};

    fn fetcher(exchange: &Arc<FakeExchange>, config: FetchConfig) -> BatchedFetcher {
        BatchedFetcher::new(
            exchange.clone(),
            exchange.clone(),
            exchange.clone(),
            test_thresholds(),
            config,
        )
    }

    #[tokio::test]
    async fn test_results_align_with_requests() {
        let exchange = Arc::new(FakeExchange::new());
        let ratios = [700, 1500, 3000, 900];
        let identities: Vec<_> = ratios.iter().map(|r| exchange.add_account_at_ratio(*r)).collect();

        let results = fetcher(&exchange, test_fetch_config())
            .fetch_and_evaluate(&identities)
            .await;
        assert_eq!(results.len(), 1);

        let items = results[0].items.as_ref().unwrap();
        let got: Vec<_> = items
            .iter()
            .map(|item| match item {
                ChunkItem::Evaluated { account, tier } => (account.key(), account.ratio, *tier),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            got,
            vec![
                (identities[0].authority, Some(MarginRatio(700)), Tier::High),
                (identities[1].authority, Some(MarginRatio(1500)), Tier::Medium),
                (identities[2].authority, Some(MarginRatio(3000)), Tier::Low),
                (identities[3].authority, Some(MarginRatio(900)), Tier::High),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let exchange = Arc::new(FakeExchange::new());
        let identities: Vec<_> = (0..250).map(|_| exchange.add_account_at_ratio(1500)).collect();
        exchange.fail_requests_for(&identities[150]);

        let results = fetcher(&exchange, test_fetch_config())
            .fetch_and_evaluate(&identities)
            .await;

        assert_eq!(exchange.batch_sizes(), vec![100, 100, 50]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].items.as_ref().map(Vec::len).ok(), Some(100));
        assert!(matches!(results[1].items, Err(MonitorError::Chain(ChainError::Rpc { .. }))));
        assert_eq!(results[1].identities, identities[100..200].to_vec());
        assert_eq!(results[2].items.as_ref().map(Vec::len).ok(), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_chunk_times_out() {
        let exchange = Arc::new(FakeExchange::new());
        let identities: Vec<_> = (0..250).map(|_| exchange.add_account_at_ratio(1500)).collect();
        exchange.stall_requests_for(&identities[120], Duration::from_secs(60));

        let results = fetcher(&exchange, test_fetch_config())
            .fetch_and_evaluate(&identities)
            .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(
            results[1].items,
            Err(MonitorError::Chain(ChainError::Timeout(5_000)))
        ));
        assert_eq!(results[1].identities, identities[100..200].to_vec());
        for (index, expected) in [(0, 100), (2, 50)] {
            let items = results[index].items.as_ref().unwrap();
            assert_eq!(items.len(), expected);
            assert!(items
                .iter()
                .all(|item| matches!(item, ChunkItem::Evaluated { tier: Tier::Medium, .. })));
        }
    }

    #[tokio::test]
    async fn test_chunk_size_is_capped() {
        let exchange = Arc::new(FakeExchange::new());
        let identities: Vec<_> = (0..150).map(|_| exchange.add_account_at_ratio(1500)).collect();
        let config = FetchConfig {
            chunk_size: 500,
            ..test_fetch_config()
        };

        let results = fetcher(&exchange, config).fetch_and_evaluate(&identities).await;
        assert_eq!(results.len(), 2);
        assert_eq!(exchange.batch_sizes(), vec![100, 50]);
    }

    #[tokio::test]
    async fn test_missing_and_undecodable_accounts() {
        let exchange = Arc::new(FakeExchange::new());
        let closed = exchange.add_account_at_ratio(1500);
        let corrupt = exchange.add_account_at_ratio(1500);
        let healthy = exchange.add_account_at_ratio(1500);
        exchange.close_account(&closed);
        exchange.corrupt(&corrupt.positions_account);

        let results = fetcher(&exchange, test_fetch_config())
            .fetch_and_evaluate(&[closed, corrupt, healthy])
            .await;
        let items = results[0].items.as_ref().unwrap();

        assert!(matches!(&items[0], ChunkItem::Missing { identity } if *identity == closed));
        assert!(matches!(&items[1], ChunkItem::Failed { error: MonitorError::Decode(_), .. }));
        assert!(matches!(&items[2], ChunkItem::Evaluated { tier: Tier::Medium, .. }));
        assert_eq!(items[1].identity(), &corrupt);
    }

    #[tokio::test]
    async fn test_unknown_market_is_per_account() {
        let exchange = Arc::new(FakeExchange::new());
        let positions =
            liquidator_chain::PositionSet::from_slice(&[crate::test_support::unit_long(9, 100)]);
        let orphan = exchange.add_account(positions, 0);
        let healthy = exchange.add_account_at_ratio(900);

        let results = fetcher(&exchange, test_fetch_config())
            .fetch_and_evaluate(&[orphan, healthy])
            .await;
        let items = results[0].items.as_ref().unwrap();

        assert!(matches!(&items[0], ChunkItem::Failed { error: MonitorError::Risk { .. }, .. }));
        assert!(matches!(&items[1], ChunkItem::Evaluated { tier: Tier::High, .. }));
    }

    #[tokio::test]
    async fn test_empty_input_issues_no_calls() {
        let exchange = Arc::new(FakeExchange::new());
        let results = fetcher(&exchange, test_fetch_config()).fetch_and_evaluate(&[]).await;
        assert!(results.is_empty());
        assert!(exchange.batch_sizes().is_empty());
    }
}
