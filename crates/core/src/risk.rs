//! Margin ratio computation and tier classification.
//!
//! Pure functions of their inputs; safe to call from any task.

use liquidator_chain::exchange::math::{base_asset_value, position_pnl};
use liquidator_chain::{Collateral, MarketLookup, MarketPosition};
use thiserror::Error;

use crate::account::{MarginRatio, Tier};
use crate::config::{config, TierConfig};

/// Ratio scale: 10,000 = 100%.
pub const MARGIN_RATIO_PRECISION: i128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("no market data for market {0}")]
    UnknownMarket(u64),

    #[error("arithmetic overflow")]
    Overflow,
}

/// Ascending margin ratio thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    pub liquidation: i128,
    pub high_priority: i128,
    pub low_priority: i128,
}

impl TierThresholds {
    /// Classify a margin ratio; the first matching rule wins.
    pub fn classify(&self, ratio: MarginRatio) -> Tier {
        let r = ratio.value();
        if r <= self.liquidation {
            Tier::Liquidate
        } else if r > self.low_priority {
            Tier::Low
        } else if r <= self.high_priority {
            Tier::High
        } else {
            Tier::Medium
        }
    }
}

impl From<&TierConfig> for TierThresholds {
    fn from(cfg: &TierConfig) -> Self {
        Self {
            liquidation: cfg.liquidation_ratio.into(),
            high_priority: cfg.high_priority_ratio.into(),
            low_priority: cfg.low_priority_ratio.into(),
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::from(&config().tiers)
    }
}

/// Result of evaluating one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub tier: Tier,
    pub ratio: MarginRatio,
    /// Sum of absolute notional values (quote precision)
    pub total_position_value: u128,
    /// Funding-inclusive unrealized PnL (quote precision)
    pub unrealized_pnl: i128,
}

/// Compute the margin ratio of an account and classify it.
pub fn evaluate(
    positions: &[MarketPosition],
    collateral: Collateral,
    markets: &dyn MarketLookup,
    thresholds: &TierThresholds,
) -> Result<Evaluation, RiskError> {
    let mut total_position_value: u128 = 0;
    let mut unrealized_pnl: i128 = 0;

    for position in positions {
        let market = markets
            .market(position.market_index)
            .ok_or(RiskError::UnknownMarket(position.market_index))?;
        let value = base_asset_value(&market, position).ok_or(RiskError::Overflow)?;
        let pnl = position_pnl(&market, position, true).ok_or(RiskError::Overflow)?;

        total_position_value = total_position_value
            .checked_add(value)
            .ok_or(RiskError::Overflow)?;
        unrealized_pnl = unrealized_pnl.checked_add(pnl).ok_or(RiskError::Overflow)?;
    }

    let ratio = if total_position_value == 0 {
        MarginRatio::MAX
    } else {
        let effective = collateral
            .checked_add(unrealized_pnl)
            .ok_or(RiskError::Overflow)?;
        let total = i128::try_from(total_position_value).map_err(|_| RiskError::Overflow)?;
        let scaled = effective
            .checked_mul(MARGIN_RATIO_PRECISION)
            .ok_or(RiskError::Overflow)?;
        MarginRatio(scaled / total)
    };

    Ok(Evaluation {
        tier: thresholds.classify(ratio),
        ratio,
        total_position_value,
        unrealized_pnl,
    })
}
