//! Monitor runtime configuration.
//!
//! Profiles, tier thresholds, scheduler cadence, fetch and discovery limits.

mod bot;

pub use bot::{
    config, init_config, BotConfig, DiscoverySettings, FetchSettings, SchedulerTimingConfig,
    TierConfig,
};
