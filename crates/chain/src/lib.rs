//! Liquidator ledger interaction layer.
//!
//! This crate provides:
//! - JSON-RPC client with batched multi-account reads and paged program scans
//! - Account layouts and position valuation for the clearing house program
//! - Exchange collaborator traits (decoder, market lookup, enumerator, executor)
//! - Market reference data cache with a background refresh loop
//! - Wallet loading, transaction signing and sending

mod error;
pub mod exchange;
mod market_cache;
pub mod rpc;
mod signer;

pub use error::{ChainError, ChainResult};
pub use exchange::{
    AccountDecoder, AccountEnumerator, ClearingHouse, ClearingHouseDecoder, Collateral,
    DiscoveredUser, LiquidationExecutor, MarketLookup, MarketPosition, MarketSnapshot,
    PositionSet, ProgramState, UserAccount, UserPage, DEFAULT_PROGRAM_ID, MAX_POSITIONS,
};
pub use market_cache::MarketCache;
pub use rpc::{
    AccountBlob, AccountFilter, AccountsRpc, Commitment, ProgramAccountsPage, SolanaRpc,
    MAX_MULTIPLE_ACCOUNTS,
};
pub use signer::{lamports_to_sol, Wallet, LAMPORTS_PER_SOL};

pub use solana_sdk::pubkey::Pubkey;
pub use solana_sdk::signature::Signature;
