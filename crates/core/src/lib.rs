//! Liquidator core logic.
//!
//! This crate provides the tiered risk monitor:
//! - Margin ratio evaluation and tier classification (Liquidate/High/Medium/Low)
//! - Batched, chunked account fetching with per-chunk failure isolation
//! - Paged startup discovery seeding the tier store
//! - Tier store with atomic moves between buckets
//! - Tick-driven scheduler refreshing risky buckets more often than safe ones
//! - Fire-and-forget liquidation trigger

mod account;
pub mod config;
mod discovery;
mod error;
mod fetcher;
mod liquidator;
mod risk;
mod scheduler;
mod tier_store;

#[cfg(test)]
mod test_support;

pub use account::{AccountIdentity, Bucket, MarginRatio, Tier, TrackedAccount};
pub use config::{config, init_config, BotConfig};
pub use discovery::{Discovery, DiscoveryConfig, DiscoverySummary, StopReason};
pub use error::MonitorError;
pub use fetcher::{BatchedFetcher, ChunkItem, ChunkResult, FetchConfig};
pub use liquidator::{LiquidationStats, LiquidationTrigger};
pub use risk::{evaluate, Evaluation, RiskError, TierThresholds, MARGIN_RATIO_PRECISION};
pub use scheduler::{Placement, RefreshOutcome, Scheduler, SchedulerConfig};
pub use tier_store::{TierStats, TierStore};
