//! Exchange collaborator layer.
//!
//! The monitor only talks to the exchange through the traits in this module:
//!
//! - [`AccountDecoder`]: raw account blobs into positions and collateral
//! - [`MarketLookup`]: market reference data by index
//! - [`AccountEnumerator`]: paged user enumeration and sub-account derivation
//! - [`LiquidationExecutor`]: liquidation submission
//!
//! [`ClearingHouse`] implements the ledger-backed versions.

mod clearing_house;
pub mod layout;
pub mod math;
mod types;

pub use clearing_house::{ClearingHouse, ClearingHouseDecoder, DEFAULT_PROGRAM_ID};
pub use layout::ProgramState;
pub use types::{
    Collateral, DiscoveredUser, MarketPosition, MarketSnapshot, PositionSet, UserAccount, UserPage,
    MAX_POSITIONS,
};

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::error::ChainResult;

/// Decodes exchange account blobs.
pub trait AccountDecoder: Send + Sync {
    fn decode_user(&self, address: &Pubkey, data: &[u8]) -> ChainResult<UserAccount>;

    fn decode_positions(&self, address: &Pubkey, data: &[u8]) -> ChainResult<PositionSet>;
}

/// Market reference data lookup.
pub trait MarketLookup: Send + Sync {
    fn market(&self, market_index: u64) -> Option<MarketSnapshot>;
}

/// Enumerates user accounts of the exchange program.
#[async_trait]
pub trait AccountEnumerator: Send + Sync {
    /// Derive the user sub-account address owned by `authority`.
    fn user_account_address(&self, authority: &Pubkey) -> Pubkey;

    /// Fetch one window of at most `limit` user accounts.
    async fn users_page(&self, cursor: Option<&str>, limit: usize) -> ChainResult<UserPage>;
}

/// Submits liquidation transactions.
#[async_trait]
pub trait LiquidationExecutor: Send + Sync {
    async fn liquidate(
        &self,
        user_account: &Pubkey,
        positions_account: &Pubkey,
    ) -> ChainResult<Signature>;
}
