//! Monitored account data structures.

use chrono::{DateTime, Utc};
use liquidator_chain::{Collateral, PositionSet, Pubkey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of a margin account plus the derived sub-accounts holding its state.
///
/// `authority` is the canonical key for every tier store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountIdentity {
    /// Owning wallet
    pub authority: Pubkey,
    /// User sub-account (collateral)
    pub user_account: Pubkey,
    /// Positions sub-account
    pub positions_account: Pubkey,
}

impl AccountIdentity {
    pub fn key(&self) -> Pubkey {
        self.authority
    }
}

/// Risk classification of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// At or below the protocol liquidation ratio, never stored
    Liquidate,
    /// Refreshed on every tick
    High,
    /// Refreshed every `medium_every_ticks`
    Medium,
    /// Refreshed every `low_every_ticks`
    Low,
}

impl Tier {
    /// Bucket holding accounts of this tier, `None` for `Liquidate`.
    pub fn bucket(self) -> Option<Bucket> {
        match self {
            Self::Liquidate => None,
            Self::High => Some(Bucket::High),
            Self::Medium => Some(Bucket::Medium),
            Self::Low => Some(Bucket::Low),
        }
    }
}

/// Stored tier buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    High,
    Medium,
    Low,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::High, Bucket::Medium, Bucket::Low];

    pub fn tier(self) -> Tier {
        match self {
            Self::High => Tier::High,
            Self::Medium => Tier::Medium,
            Self::Low => Tier::Low,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

/// Effective collateral over total notional, scaled by 10,000.
///
/// Negative when the account is insolvent. Accounts without exposure get [`MarginRatio::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarginRatio(pub i128);

impl MarginRatio {
    pub const MAX: MarginRatio = MarginRatio(i128::MAX);

    pub fn value(self) -> i128 {
        self.0
    }

    pub fn is_max(self) -> bool {
        self == Self::MAX
    }
}

impl fmt::Display for MarginRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            f.write_str("MAX")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Last known state of a monitored account.
#[derive(Debug, Clone)]
pub struct TrackedAccount {
    pub identity: AccountIdentity,
    pub positions: PositionSet,
    pub collateral: Collateral,
    /// `None` until the first successful evaluation
    pub ratio: Option<MarginRatio>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedAccount {
    pub fn new(
        identity: AccountIdentity,
        positions: PositionSet,
        collateral: Collateral,
        ratio: MarginRatio,
    ) -> Self {
        Self {
            identity,
            positions,
            collateral,
            ratio: Some(ratio),
            updated_at: Utc::now(),
        }
    }

    /// Placeholder for an account whose first fetch or evaluation failed.
    pub fn unevaluated(identity: AccountIdentity) -> Self {
        Self {
            identity,
            positions: PositionSet::new(),
            collateral: 0,
            ratio: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> Pubkey {
        self.identity.authority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_buckets() {
        assert_eq!(Tier::Liquidate.bucket(), None);
        for bucket in Bucket::ALL {
            assert_eq!(bucket.tier().bucket(), Some(bucket));
        }
    }

    #[test]
    fn test_margin_ratio_display() {
        assert_eq!(MarginRatio::MAX.to_string(), "MAX");
        assert_eq!(MarginRatio(-150).to_string(), "-150");
        assert!(MarginRatio(-1) < MarginRatio(0));
    }
}
