//! Position valuation.
//!
//! Pure fixed-point functions. All return `None` on arithmetic overflow.

use super::types::{MarketPosition, MarketSnapshot};

pub const MARK_PRICE_PRECISION: u128 = 10_000_000_000;
pub const AMM_RESERVE_PRECISION: u128 = 10_000_000_000_000;
pub const QUOTE_PRECISION: u128 = 1_000_000;
pub const PEG_PRECISION: u128 = 1_000;

/// Converts `base * price` into quote precision.
const AMM_TO_QUOTE: u128 = AMM_RESERVE_PRECISION * MARK_PRICE_PRECISION / QUOTE_PRECISION;

/// Mark price implied by AMM reserves.
pub fn amm_mark_price(
    base_asset_reserve: u128,
    quote_asset_reserve: u128,
    peg_multiplier: u128,
) -> Option<u128> {
    if base_asset_reserve == 0 {
        return Some(0);
    }
    quote_asset_reserve
        .checked_mul(peg_multiplier)?
        .checked_mul(MARK_PRICE_PRECISION / PEG_PRECISION)?
        .checked_div(base_asset_reserve)
}

/// Absolute notional value of a position at mark, in quote precision.
pub fn base_asset_value(market: &MarketSnapshot, position: &MarketPosition) -> Option<u128> {
    position
        .base_asset_amount
        .unsigned_abs()
        .checked_mul(market.mark_price)
        .map(|v| v / AMM_TO_QUOTE)
}

/// Funding owed to (positive) or by (negative) the position since its last settlement.
pub fn funding_payment(market: &MarketSnapshot, position: &MarketPosition) -> Option<i128> {
    if !position.is_open() {
        return Some(0);
    }
    let cumulative = if position.is_long() {
        market.cumulative_funding_rate_long
    } else {
        market.cumulative_funding_rate_short
    };
    let delta = cumulative.checked_sub(position.last_cumulative_funding_rate)?;
    // Longs pay when the cumulative rate rises, shorts receive.
    let payment = delta.checked_mul(position.base_asset_amount)? / AMM_TO_QUOTE as i128;
    payment.checked_neg()
}

/// Unrealized PnL of a position at mark, optionally including pending funding.
pub fn position_pnl(
    market: &MarketSnapshot,
    position: &MarketPosition,
    with_funding: bool,
) -> Option<i128> {
    if !position.is_open() {
        return Some(0);
    }
    let value = i128::try_from(base_asset_value(market, position)?).ok()?;
    let entry = i128::try_from(position.quote_asset_amount).ok()?;

    let mut pnl = if position.is_long() {
        value.checked_sub(entry)?
    } else {
        entry.checked_sub(value)?
    };

    if with_funding {
        pnl = pnl.checked_add(funding_payment(market, position)?)?;
    }
    Some(pnl)
}
