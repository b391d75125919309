//! Configuration management with profile support.
//!
//! Provides centralized configuration for all monitor parameters with
//! support for different profiles (testing, production, aggressive).

use liquidator_chain::{Commitment, MAX_MULTIPLE_ACCOUNTS};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::MonitorError;

/// Main configuration structure containing all monitor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Market cache refresh interval (milliseconds)
    #[serde(default = "default_market_refresh")]
    pub market_refresh_ms: u64,

    /// Margin ratio thresholds for tier classification
    #[serde(default)]
    pub tiers: TierConfig,

    /// Tick loop cadence
    #[serde(default)]
    pub scheduler: SchedulerTimingConfig,

    /// Bulk account fetching
    #[serde(default)]
    pub fetch: FetchSettings,

    /// Startup account enumeration
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

fn default_profile_name() -> String {
    "default".to_string()
}
fn default_market_refresh() -> u64 {
    1000
}

/// Margin ratio thresholds, scaled by 10,000.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Protocol partial-liquidation ratio (at or below = Liquidate)
    #[serde(default = "default_liquidation_ratio")]
    pub liquidation_ratio: i64,

    /// At or below = High
    #[serde(default = "default_high_priority_ratio")]
    pub high_priority_ratio: i64,

    /// Above = Low, between high and low = Medium
    #[serde(default = "default_low_priority_ratio")]
    pub low_priority_ratio: i64,
}

fn default_liquidation_ratio() -> i64 {
    625
}
fn default_high_priority_ratio() -> i64 {
    1000
}
fn default_low_priority_ratio() -> i64 {
    2000
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            liquidation_ratio: default_liquidation_ratio(),
            high_priority_ratio: default_high_priority_ratio(),
            low_priority_ratio: default_low_priority_ratio(),
        }
    }
}

/// Scheduler cadence, in ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerTimingConfig {
    /// Pause between ticks (milliseconds)
    #[serde(default = "default_pacing")]
    pub pacing_ms: u64,

    /// Medium bucket is refreshed on multiples of this tick
    #[serde(default = "default_medium_every")]
    pub medium_every_ticks: u64,

    /// Low bucket is refreshed on multiples of this tick
    #[serde(default = "default_low_every")]
    pub low_every_ticks: u64,

    /// Tier statistics are logged on multiples of this tick
    #[serde(default = "default_stats_every")]
    pub stats_every_ticks: u64,
}

fn default_pacing() -> u64 {
    100
}
fn default_medium_every() -> u64 {
    1200
}
fn default_low_every() -> u64 {
    24000
}
fn default_stats_every() -> u64 {
    600
}

impl Default for SchedulerTimingConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing(),
            medium_every_ticks: default_medium_every(),
            low_every_ticks: default_low_every(),
            stats_every_ticks: default_stats_every(),
        }
    }
}

impl SchedulerTimingConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Bulk account fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Identities per bulk call (capped at the RPC item limit)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub commitment: Commitment,

    /// Per chunk call timeout (milliseconds)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_chunk_size() -> usize {
    MAX_MULTIPLE_ACCOUNTS
}
fn default_rpc_timeout() -> u64 {
    10_000
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            commitment: Commitment::default(),
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

impl FetchSettings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Paged account enumeration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Accounts per enumeration window
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Hard cap on windows fetched
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_page_size() -> usize {
    1000
}
fn default_max_pages() -> usize {
    1000
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            tiers: TierConfig::default(),
            scheduler: SchedulerTimingConfig::default(),
            fetch: FetchSettings::default(),
            discovery: DiscoverySettings::default(),
            market_refresh_ms: default_market_refresh(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a testing profile: wider risky bands, slower pacing, small discovery.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            tiers: TierConfig {
                high_priority_ratio: 1500,
                low_priority_ratio: 3000,
                ..Default::default()
            },
            scheduler: SchedulerTimingConfig {
                pacing_ms: 200,
                medium_every_ticks: 600,
                low_every_ticks: 6000,
                stats_every_ticks: 300,
            },
            fetch: FetchSettings {
                rpc_timeout_ms: 20_000, // Public devnet endpoints are slow
                ..Default::default()
            },
            discovery: DiscoverySettings {
                page_size: 500,
                max_pages: 50,
            },
            market_refresh_ms: 2000,
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            tiers: TierConfig::default(),
            scheduler: SchedulerTimingConfig::default(),
            fetch: FetchSettings {
                rpc_timeout_ms: 5_000,
                ..Default::default()
            },
            discovery: DiscoverySettings::default(),
            market_refresh_ms: default_market_refresh(),
        }
    }

    /// Create an aggressive profile for maximum speed.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            tiers: TierConfig {
                high_priority_ratio: 1250,
                low_priority_ratio: 2500,
                ..Default::default()
            },
            scheduler: SchedulerTimingConfig {
                pacing_ms: 50,
                medium_every_ticks: 600,
                low_every_ticks: 12000,
                stats_every_ticks: 1200,
            },
            fetch: FetchSettings {
                commitment: Commitment::Processed,
                rpc_timeout_ms: 3_000,
                ..Default::default()
            },
            discovery: DiscoverySettings::default(),
            market_refresh_ms: 500,
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Resolve BOT_PROFILE (profile name or `.toml` path) and validate the result.
    pub fn load_from_env() -> Result<Self, MonitorError> {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        let config = if profile.ends_with(".toml") {
            Self::from_file(&profile)
                .map_err(|e| MonitorError::Config(format!("failed to load {profile}: {e}")))?
        } else {
            Self::from_profile(&profile)
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the monitor cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let t = &self.tiers;
        if !(t.liquidation_ratio < t.high_priority_ratio
            && t.high_priority_ratio < t.low_priority_ratio)
        {
            return Err(MonitorError::Config(format!(
                "tier ratios must ascend: liquidation {} < high {} < low {}",
                t.liquidation_ratio, t.high_priority_ratio, t.low_priority_ratio
            )));
        }
        let s = &self.scheduler;
        if s.medium_every_ticks == 0 || s.low_every_ticks == 0 || s.stats_every_ticks == 0 {
            return Err(MonitorError::Config("scheduler tick moduli must be non-zero".into()));
        }
        if self.fetch.chunk_size == 0 || self.fetch.chunk_size > MAX_MULTIPLE_ACCOUNTS {
            return Err(MonitorError::Config(format!(
                "fetch.chunk_size must be in 1..={MAX_MULTIPLE_ACCOUNTS}, got {}",
                self.fetch.chunk_size
            )));
        }
        if self.discovery.page_size == 0 || self.discovery.max_pages == 0 {
            return Err(MonitorError::Config(
                "discovery page_size and max_pages must be non-zero".into(),
            ));
        }
        if self.market_refresh_ms == 0 {
            return Err(MonitorError::Config("market_refresh_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn market_refresh(&self) -> Duration {
        Duration::from_millis(self.market_refresh_ms)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            liquidation = self.tiers.liquidation_ratio,
            high = self.tiers.high_priority_ratio,
            low = self.tiers.low_priority_ratio,
            "Tier margin ratio thresholds"
        );
        tracing::info!(
            pacing_ms = self.scheduler.pacing_ms,
            medium_every = self.scheduler.medium_every_ticks,
            low_every = self.scheduler.low_every_ticks,
            "Scheduler cadence"
        );
        tracing::info!(
            chunk_size = self.fetch.chunk_size,
            commitment = self.fetch.commitment.as_str(),
            rpc_timeout_ms = self.fetch.rpc_timeout_ms,
            page_size = self.discovery.page_size,
            "Fetch parameters"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}
