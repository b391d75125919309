//! On-chain account layouts of the clearing house program.
//!
//! Accounts are Anchor accounts: an 8-byte discriminator followed by a packed body, which
//! reads the same as Borsh. Fixed-size array elements are declared in full, padding included,
//! and decoded from their own byte window so every slot starts at its on-chain offset.
//! Trailing bytes after a single top-level record are ignored.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::hash::hash;
use solana_sdk::pubkey::Pubkey;

use super::math::amm_mark_price;
use super::types::{MarketPosition, MarketSnapshot, PositionSet, UserAccount, MAX_POSITIONS};
use crate::error::{ChainError, ChainResult};

pub const DISCRIMINATOR_LEN: usize = 8;

const PUBKEY_LEN: usize = 32;

/// Number of market slots in the markets account.
pub const MAX_MARKETS: usize = 64;

/// On-chain size of one `MarketPosition` slot.
pub const MARKET_POSITION_LEN: usize = 208;

/// On-chain size of one `Market` slot.
pub const MARKET_LEN: usize = 522;

/// Anchor account discriminator: first 8 bytes of `sha256("account:<Name>")`.
pub fn account_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = hash(format!("account:{name}").as_bytes()).to_bytes();
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Anchor instruction discriminator: first 8 bytes of `sha256("global:<name>")`.
pub fn instruction_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = hash(format!("global:{name}").as_bytes()).to_bytes();
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct UserLayout {
    pub authority: Pubkey,
    pub collateral: u128,
    pub cumulative_deposits: i128,
    pub total_fee_paid: u128,
    pub total_token_discount: u128,
    pub total_referral_reward: u128,
    pub total_referee_discount: u128,
    pub positions: Pubkey,
}

#[derive(Debug, Clone, Copy, Default, BorshSerialize, BorshDeserialize)]
pub(crate) struct MarketPositionLayout {
    pub market_index: u64,
    pub base_asset_amount: i128,
    pub quote_asset_amount: u128,
    pub last_cumulative_funding_rate: i128,
    pub last_cumulative_repeg_rebate: u128,
    pub last_funding_rate_ts: i64,
    pub open_orders: u128,
    pub padding: [u128; 7],
}

#[derive(Debug, Clone, Default, BorshSerialize, BorshDeserialize)]
pub(crate) struct AmmLayout {
    pub oracle: Pubkey,
    pub oracle_source: u8,
    pub base_asset_reserve: u128,
    pub quote_asset_reserve: u128,
    pub cumulative_repeg_rebate_long: u128,
    pub cumulative_repeg_rebate_short: u128,
    pub cumulative_funding_rate_long: i128,
    pub cumulative_funding_rate_short: i128,
    pub last_funding_rate: i128,
    pub last_funding_rate_ts: i64,
    pub funding_period: i64,
    pub last_oracle_price_twap: i128,
    pub last_mark_price_twap: u128,
    pub last_mark_price_twap_ts: i64,
    pub sqrt_k: u128,
    pub peg_multiplier: u128,
    pub total_fee: u128,
    pub total_fee_minus_distributions: u128,
    pub total_fee_withdrawn: u128,
    pub minimum_quote_asset_trade_size: u128,
    pub last_oracle_price_twap_ts: i64,
    pub last_oracle_price: i128,
    pub minimum_base_asset_trade_size: u128,
    pub padding0: u64,
    pub padding1: [u128; 2],
}

#[derive(Debug, Clone, Default, BorshSerialize, BorshDeserialize)]
pub(crate) struct MarketLayout {
    pub initialized: bool,
    pub base_asset_amount_long: i128,
    pub base_asset_amount_short: i128,
    pub base_asset_amount: i128,
    pub open_interest: u128,
    pub amm: AmmLayout,
    pub margin_ratio_initial: u32,
    pub margin_ratio_partial: u32,
    pub margin_ratio_maintenance: u32,
    pub padding0: u32,
    pub padding1: [u128; 4],
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct StateLayout {
    pub admin: Pubkey,
    pub funding_paused: bool,
    pub exchange_paused: bool,
    pub admin_controls_prices: bool,
    pub collateral_mint: Pubkey,
    pub collateral_vault: Pubkey,
    pub collateral_vault_authority: Pubkey,
    pub collateral_vault_nonce: u8,
    pub deposit_history: Pubkey,
    pub trade_history: Pubkey,
    pub funding_payment_history: Pubkey,
    pub funding_rate_history: Pubkey,
    pub liquidation_history: Pubkey,
    pub curve_history: Pubkey,
    pub insurance_vault: Pubkey,
    pub insurance_vault_authority: Pubkey,
    pub insurance_vault_nonce: u8,
    pub markets: Pubkey,
}

/// Program-wide accounts referenced by liquidation instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramState {
    pub exchange_paused: bool,
    pub collateral_vault: Pubkey,
    pub collateral_vault_authority: Pubkey,
    pub insurance_vault: Pubkey,
    pub insurance_vault_authority: Pubkey,
    pub markets: Pubkey,
    pub trade_history: Pubkey,
    pub liquidation_history: Pubkey,
    pub funding_payment_history: Pubkey,
}

fn body<'a>(kind: &'static str, address: &Pubkey, data: &'a [u8]) -> ChainResult<&'a [u8]> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(ChainError::decode(kind, *address, "shorter than discriminator"));
    }
    let (disc, rest) = data.split_at(DISCRIMINATOR_LEN);
    if disc != account_discriminator(kind) {
        return Err(ChainError::decode(kind, *address, "discriminator mismatch"));
    }
    Ok(rest)
}

fn read<T: BorshDeserialize>(kind: &'static str, address: &Pubkey, data: &[u8]) -> ChainResult<T> {
    let mut rest = body(kind, address, data)?;
    T::deserialize(&mut rest).map_err(|e| ChainError::decode(kind, *address, e))
}

/// Decode `count` consecutive `T` slots of `stride` bytes each, starting at `data[0]`.
fn read_slots<T: BorshDeserialize>(
    kind: &'static str,
    address: &Pubkey,
    data: &[u8],
    stride: usize,
    count: usize,
) -> ChainResult<Vec<T>> {
    if data.len() < stride * count {
        return Err(ChainError::decode(
            kind,
            *address,
            format!("expected {} slot bytes, got {}", stride * count, data.len()),
        ));
    }
    data.chunks_exact(stride)
        .take(count)
        .enumerate()
        .map(|(index, mut window)| {
            T::deserialize(&mut window)
                .map_err(|e| ChainError::decode(kind, *address, format!("slot {index}: {e}")))
        })
        .collect()
}

pub fn decode_user(address: &Pubkey, data: &[u8]) -> ChainResult<UserAccount> {
    let layout: UserLayout = read("User", address, data)?;
    let collateral = i128::try_from(layout.collateral)
        .map_err(|_| ChainError::decode("User", *address, "collateral out of range"))?;
    Ok(UserAccount {
        authority: layout.authority,
        collateral,
        positions: layout.positions,
    })
}

pub fn decode_positions(address: &Pubkey, data: &[u8]) -> ChainResult<PositionSet> {
    let rest = body("UserPositions", address, data)?;
    let Some(slots) = rest.get(PUBKEY_LEN..) else {
        return Err(ChainError::decode("UserPositions", *address, "missing user key"));
    };
    let positions: Vec<MarketPositionLayout> =
        read_slots("UserPositions", address, slots, MARKET_POSITION_LEN, MAX_POSITIONS)?;
    Ok(positions
        .iter()
        .filter(|p| p.base_asset_amount != 0)
        .map(|p| MarketPosition {
            market_index: p.market_index,
            base_asset_amount: p.base_asset_amount,
            quote_asset_amount: p.quote_asset_amount,
            last_cumulative_funding_rate: p.last_cumulative_funding_rate,
        })
        .collect())
}

pub fn decode_state(address: &Pubkey, data: &[u8]) -> ChainResult<ProgramState> {
    let layout: StateLayout = read("State", address, data)?;
    Ok(ProgramState {
        exchange_paused: layout.exchange_paused,
        collateral_vault: layout.collateral_vault,
        collateral_vault_authority: layout.collateral_vault_authority,
        insurance_vault: layout.insurance_vault,
        insurance_vault_authority: layout.insurance_vault_authority,
        markets: layout.markets,
        trade_history: layout.trade_history,
        liquidation_history: layout.liquidation_history,
        funding_payment_history: layout.funding_payment_history,
    })
}

/// Decode every initialized market slot.
pub fn decode_markets(address: &Pubkey, data: &[u8]) -> ChainResult<Vec<MarketSnapshot>> {
    let rest = body("Markets", address, data)?;
    let markets: Vec<MarketLayout> = read_slots("Markets", address, rest, MARKET_LEN, MAX_MARKETS)?;
    let mut snapshots = Vec::new();

    for (index, market) in markets.iter().enumerate() {
        if !market.initialized {
            continue;
        }
        let amm = &market.amm;
        let mark_price =
            amm_mark_price(amm.base_asset_reserve, amm.quote_asset_reserve, amm.peg_multiplier)
                .ok_or_else(|| {
                    let reason = format!("slot {index}: mark price overflow");
                    ChainError::decode("Markets", *address, reason)
                })?;
        snapshots.push(MarketSnapshot {
            market_index: index as u64,
            mark_price,
            cumulative_funding_rate_long: amm.cumulative_funding_rate_long,
            cumulative_funding_rate_short: amm.cumulative_funding_rate_short,
        });
    }

    Ok(snapshots)
}

/// Encode an account with its discriminator.
#[cfg(test)]
pub(crate) fn encode_account<T: BorshSerialize>(kind: &str, value: &T) -> Vec<u8> {
    let mut data = account_discriminator(kind).to_vec();
    value.serialize(&mut data).unwrap();
    data
}
