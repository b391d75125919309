//! Decoded exchange records.

use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;

/// Position slots per user positions account.
pub const MAX_POSITIONS: usize = 5;

/// Deposited margin in quote precision. Signed so that losses can push it negative.
pub type Collateral = i128;

/// Open positions of one user, in slot order. Empty slots are dropped on decode.
pub type PositionSet = SmallVec<[MarketPosition; MAX_POSITIONS]>;

/// A single perpetual position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketPosition {
    /// Market this position trades
    pub market_index: u64,
    /// Signed base size (AMM reserve precision). Positive = long.
    pub base_asset_amount: i128,
    /// Entry notional (quote precision)
    pub quote_asset_amount: u128,
    /// Cumulative funding rate at last settlement
    pub last_cumulative_funding_rate: i128,
}

impl MarketPosition {
    pub fn is_open(&self) -> bool {
        self.base_asset_amount != 0
    }

    pub fn is_long(&self) -> bool {
        self.base_asset_amount > 0
    }
}

/// User account record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// Owning wallet
    pub authority: Pubkey,
    /// Deposited collateral (quote precision)
    pub collateral: Collateral,
    /// Address of the user's positions account
    pub positions: Pubkey,
}

/// Market reference data needed to value positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub market_index: u64,
    /// Mark price (mark price precision)
    pub mark_price: u128,
    pub cumulative_funding_rate_long: i128,
    pub cumulative_funding_rate_short: i128,
}

/// A user account found during enumeration.
#[derive(Debug, Clone)]
pub struct DiscoveredUser {
    /// Address the account lives at
    pub address: Pubkey,
    pub user: UserAccount,
}

/// One window of user account enumeration.
#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub users: Vec<DiscoveredUser>,
    /// Cursor for the next window, `None` on the last page
    pub next: Option<String>,
}
