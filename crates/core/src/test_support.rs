//! In-memory exchange and ledger used by the unit tests.

use async_trait::async_trait;
use liquidator_chain::exchange::math::{MARK_PRICE_PRECISION, QUOTE_PRECISION};
use liquidator_chain::rpc::ProgramAccountsPage;
use liquidator_chain::{
    AccountBlob, AccountDecoder, AccountEnumerator, AccountFilter, AccountsRpc, ChainError,
    ChainResult, Collateral, Commitment, DiscoveredUser, LiquidationExecutor, MarketLookup,
    MarketPosition, MarketSnapshot, PositionSet, Pubkey, Signature, UserAccount, UserPage,
};
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use solana_sdk::transaction::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::account::AccountIdentity;
use crate::fetcher::FetchConfig;
use crate::risk::TierThresholds;

/// One dollar in quote precision.
pub const USD: i128 = QUOTE_PRECISION as i128;

const ONE_UNIT: i128 = 10_000_000_000_000;

/// Price of market 0 installed by [`FakeExchange::new`].
pub const DEFAULT_PRICE_USD: u128 = 10_000;

/// One unit long entered at `entry_usd`.
pub fn unit_long(market_index: u64, entry_usd: u128) -> MarketPosition {
    MarketPosition {
        market_index,
        base_asset_amount: ONE_UNIT,
        quote_asset_amount: entry_usd * QUOTE_PRECISION,
        last_cumulative_funding_rate: 0,
    }
}

/// Collateral giving `ratio` against `notional_usd` of flat exposure.
pub fn collateral_for_ratio(notional_usd: i128, ratio: i128) -> Collateral {
    notional_usd * USD * ratio / 10_000
}

pub fn test_thresholds() -> TierThresholds {
    TierThresholds {
        liquidation: 625,
        high_priority: 1000,
        low_priority: 2000,
    }
}

pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        chunk_size: 100,
        commitment: Commitment::Confirmed,
        rpc_timeout: Duration::from_secs(5),
    }
}

#[derive(Debug, Clone)]
enum FakeAccount {
    User(UserAccount),
    Positions(PositionSet),
    Corrupt,
}

/// Exchange, ledger and executor in one.
pub struct FakeExchange {
    program_id: Pubkey,
    markets: Mutex<HashMap<u64, MarketSnapshot>>,
    accounts: Mutex<HashMap<Pubkey, FakeAccount>>,
    /// Enumeration order of user accounts
    users: Mutex<Vec<Pubkey>>,
    /// Batch calls touching any of these addresses fail
    failing_keys: Mutex<HashSet<Pubkey>>,
    /// Batch calls touching any of these addresses answer only after the delay
    stalled_keys: Mutex<HashMap<Pubkey, Duration>>,
    /// Sizes of each bulk call, in call order
    batch_sizes: Mutex<Vec<usize>>,
    /// Liquidated user accounts, in submission order
    liquidations: Mutex<Vec<Pubkey>>,
    fail_liquidations: AtomicBool,
    /// Enumeration cursor wraps to the first page instead of ending
    wrap_pages: AtomicBool,
}

impl FakeExchange {
    pub fn new() -> Self {
        let exchange = Self {
            program_id: Pubkey::new_unique(),
            markets: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            users: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            stalled_keys: Mutex::new(HashMap::new()),
            batch_sizes: Mutex::new(Vec::new()),
            liquidations: Mutex::new(Vec::new()),
            fail_liquidations: AtomicBool::new(false),
            wrap_pages: AtomicBool::new(false),
        };
        exchange.set_price(0, DEFAULT_PRICE_USD);
        exchange
    }

    pub fn set_price(&self, market_index: u64, usd: u128) {
        self.markets.lock().insert(
            market_index,
            MarketSnapshot {
                market_index,
                mark_price: usd * MARK_PRICE_PRECISION,
                cumulative_funding_rate_long: 0,
                cumulative_funding_rate_short: 0,
            },
        );
    }

    /// Create an account with the given positions and collateral.
    pub fn add_account(&self, positions: PositionSet, collateral: Collateral) -> AccountIdentity {
        let authority = Pubkey::new_unique();
        let identity = AccountIdentity {
            authority,
            user_account: self.user_account_address(&authority),
            positions_account: Pubkey::new_unique(),
        };
        let mut accounts = self.accounts.lock();
        accounts.insert(
            identity.user_account,
            FakeAccount::User(UserAccount {
                authority,
                collateral,
                positions: identity.positions_account,
            }),
        );
        accounts.insert(identity.positions_account, FakeAccount::Positions(positions));
        self.users.lock().push(identity.user_account);
        identity
    }

    /// Create an account with one market 0 position at `ratio`.
    pub fn add_account_at_ratio(&self, ratio: i128) -> AccountIdentity {
        let positions = PositionSet::from_slice(&[unit_long(0, DEFAULT_PRICE_USD)]);
        self.add_account(positions, collateral_for_ratio(DEFAULT_PRICE_USD as i128, ratio))
    }

    /// Move an account created by [`Self::add_account_at_ratio`] to `ratio`.
    pub fn set_ratio(&self, identity: &AccountIdentity, ratio: i128) {
        let mut accounts = self.accounts.lock();
        if let Some(FakeAccount::User(user)) = accounts.get_mut(&identity.user_account) {
            user.collateral = collateral_for_ratio(DEFAULT_PRICE_USD as i128, ratio);
        }
    }

    pub fn close_account(&self, identity: &AccountIdentity) {
        let mut accounts = self.accounts.lock();
        accounts.remove(&identity.user_account);
        accounts.remove(&identity.positions_account);
    }

    pub fn corrupt(&self, address: &Pubkey) {
        self.accounts.lock().insert(*address, FakeAccount::Corrupt);
    }

    pub fn fail_requests_for(&self, identity: &AccountIdentity) {
        self.failing_keys.lock().insert(identity.positions_account);
    }

    /// Delay every bulk call that includes `identity` by `delay`.
    pub fn stall_requests_for(&self, identity: &AccountIdentity, delay: Duration) {
        self.stalled_keys.lock().insert(identity.positions_account, delay);
    }

    pub fn heal(&self) {
        self.failing_keys.lock().clear();
        self.stalled_keys.lock().clear();
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn liquidations(&self) -> Vec<Pubkey> {
        self.liquidations.lock().clone()
    }

    pub fn set_fail_liquidations(&self, fail: bool) {
        self.fail_liquidations.store(fail, Ordering::SeqCst);
    }

    pub fn set_wrap_pages(&self, wrap: bool) {
        self.wrap_pages.store(wrap, Ordering::SeqCst);
    }

    fn blob(&self, address: &Pubkey) -> AccountBlob {
        self.accounts.lock().get(address).map(|_| address.to_bytes().to_vec())
    }
}

impl MarketLookup for FakeExchange {
    fn market(&self, market_index: u64) -> Option<MarketSnapshot> {
        self.markets.lock().get(&market_index).copied()
    }
}

impl AccountDecoder for FakeExchange {
    fn decode_user(&self, address: &Pubkey, _data: &[u8]) -> ChainResult<UserAccount> {
        match self.accounts.lock().get(address) {
            Some(FakeAccount::User(user)) => Ok(user.clone()),
            _ => Err(ChainError::Decode {
                kind: "User",
                address: *address,
                reason: "not a user account".into(),
            }),
        }
    }

    fn decode_positions(&self, address: &Pubkey, _data: &[u8]) -> ChainResult<PositionSet> {
        match self.accounts.lock().get(address) {
            Some(FakeAccount::Positions(positions)) => Ok(positions.clone()),
            _ => Err(ChainError::Decode {
                kind: "UserPositions",
                address: *address,
                reason: "not a positions account".into(),
            }),
        }
    }
}

#[async_trait]
impl AccountsRpc for FakeExchange {
    async fn get_multiple_accounts_batch(
        &self,
        lists: &[&[Pubkey]],
        _commitment: Commitment,
    ) -> ChainResult<Vec<Vec<AccountBlob>>> {
        self.batch_sizes
            .lock()
            .push(lists.first().map(|l| l.len()).unwrap_or_default());

        let stall = {
            let stalled = self.stalled_keys.lock();
            lists
                .iter()
                .flat_map(|l| l.iter())
                .filter_map(|k| stalled.get(k).copied())
                .max()
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing_keys.lock().clone();
        if lists.iter().flat_map(|l| l.iter()).any(|k| failing.contains(k)) {
            return Err(ChainError::Rpc {
                code: -32005,
                message: "node is behind".into(),
            });
        }

        Ok(lists
            .iter()
            .map(|keys| keys.iter().map(|k| self.blob(k)).collect())
            .collect())
    }

    async fn get_account(&self, key: &Pubkey, _commitment: Commitment) -> ChainResult<AccountBlob> {
        Ok(self.blob(key))
    }

    async fn get_balance(&self, _key: &Pubkey) -> ChainResult<u64> {
        Ok(0)
    }

    async fn get_program_accounts_page(
        &self,
        _program: &Pubkey,
        _filters: &[AccountFilter],
        _cursor: Option<&str>,
        _limit: usize,
        _commitment: Commitment,
    ) -> ChainResult<ProgramAccountsPage> {
        Ok(ProgramAccountsPage::default())
    }

    async fn get_latest_blockhash(&self) -> ChainResult<Hash> {
        Ok(Hash::default())
    }

    async fn send_transaction(&self, _tx: &Transaction) -> ChainResult<Signature> {
        Err(ChainError::Transaction("not supported by the fake ledger".into()))
    }
}

#[async_trait]
impl AccountEnumerator for FakeExchange {
    fn user_account_address(&self, authority: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"user", authority.as_ref()], &self.program_id).0
    }

    async fn users_page(&self, cursor: Option<&str>, limit: usize) -> ChainResult<UserPage> {
        let start: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| ChainError::MalformedResponse(format!("bad cursor {c}")))?,
            None => 0,
        };
        let addresses = self.users.lock().clone();
        let end = (start + limit).min(addresses.len());

        let users = addresses[start.min(end)..end]
            .iter()
            .map(|address| {
                let data = self.blob(address).unwrap_or_default();
                Ok(DiscoveredUser {
                    address: *address,
                    user: self.decode_user(address, &data)?,
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;

        let next = if end < addresses.len() {
            Some(end.to_string())
        } else if self.wrap_pages.load(Ordering::SeqCst) {
            Some("0".to_string())
        } else {
            None
        };
        Ok(UserPage { users, next })
    }
}

#[async_trait]
impl LiquidationExecutor for FakeExchange {
    async fn liquidate(
        &self,
        user_account: &Pubkey,
        _positions_account: &Pubkey,
    ) -> ChainResult<Signature> {
        tokio::task::yield_now().await;
        self.liquidations.lock().push(*user_account);
        if self.fail_liquidations.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32002,
                message: "transaction simulation failed".into(),
            });
        }
        Ok(Signature::default())
    }
}
