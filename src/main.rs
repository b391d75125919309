//! Drift Liquidation Bot
//!
//! Tiered risk monitor and liquidator for a perpetuals clearing house on Solana.
//! Features:
//! - Paged discovery of every user account at startup
//! - Tiered account buckets (High/Medium/Low) refreshed at different cadences
//! - Batched account fetching with per-chunk failure isolation
//! - Fire-and-forget liquidation submission

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_chain::{
    lamports_to_sol, AccountsRpc, ClearingHouse, ClearingHouseDecoder, MarketCache, Pubkey,
    SolanaRpc, Wallet, DEFAULT_PROGRAM_ID,
};
use liquidator_core::{
    init_config, BatchedFetcher, BotConfig, Discovery, DiscoveryConfig, FetchConfig,
    LiquidationTrigger, Scheduler, SchedulerConfig, TierStore, TierThresholds,
};

/// Environment variable names.
mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const PROGRAM_ID: &str = "PROGRAM_ID";
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")
        }))
        .init();

    // Must be initialized before any core component reads its defaults.
    // BOT_PROFILE selects testing, production, aggressive or a .toml file path
    let bot_config = BotConfig::load_from_env()?;
    bot_config.log_config();
    init_config(bot_config.clone());

    let config = load_config()?;
    info!(rpc = %config.rpc_url, program = %config.program_id, "Starting Drift liquidation bot");

    let commitment = bot_config.fetch.commitment;
    let rpc: Arc<dyn AccountsRpc> =
        Arc::new(SolanaRpc::new(&config.rpc_url, bot_config.fetch.rpc_timeout())?);

    let wallet = Arc::new(Wallet::from_secret_json(&config.private_key)?);
    match rpc.get_balance(&wallet.pubkey()).await {
        Ok(lamports) => info!(
            pubkey = %wallet.pubkey(),
            balance_sol = lamports_to_sol(lamports),
            "Liquidator balance"
        ),
        Err(e) => warn!(error = %e, "Failed to read liquidator balance"),
    }

    let clearing_house = Arc::new(
        ClearingHouse::connect(rpc.clone(), wallet, config.program_id, commitment).await?,
    );

    // Markets must be known before anything can be evaluated
    let markets = Arc::new(MarketCache::new());
    let market_count = markets
        .refresh(rpc.as_ref(), &clearing_house.markets_address(), commitment)
        .await
        .context("initial market load failed")?;
    info!(markets = market_count, "Market cache loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_handle = tokio::spawn(markets.clone().run_refresh_loop(
        rpc.clone(),
        clearing_house.markets_address(),
        commitment,
        bot_config.market_refresh(),
        shutdown_rx.clone(),
    ));

    let store = Arc::new(TierStore::new());
    let fetcher = Arc::new(BatchedFetcher::new(
        rpc,
        Arc::new(ClearingHouseDecoder),
        markets,
        TierThresholds::default(),
        FetchConfig::default(),
    ));
    let trigger = Arc::new(LiquidationTrigger::new(clearing_house.clone(), store.clone()));

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    info!("Discovering accounts...");
    let discovery = Discovery::new(
        clearing_house,
        fetcher.clone(),
        store.clone(),
        trigger.clone(),
        DiscoveryConfig::default(),
    );
    discovery.discover_all().await?;

    info!("Starting scheduler loop...");
    let mut scheduler = Scheduler::new(store, fetcher, trigger.clone(), SchedulerConfig::default());
    scheduler.run(shutdown_rx).await;

    trigger.drain().await;
    if let Err(e) = refresh_handle.await {
        warn!(error = %e, "Market refresh task ended abnormally");
    }

    let stats = trigger.stats();
    info!(
        attempted = stats.attempted(),
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        "Liquidator stopped"
    );
    Ok(())
}

/// Configuration loaded from environment.
struct Config {
    rpc_url: String,
    private_key: String,
    program_id: Pubkey,
}

fn load_config() -> Result<Config> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let program_id = get_env(env::PROGRAM_ID)
        .unwrap_or_else(|_| DEFAULT_PROGRAM_ID.to_string())
        .parse::<Pubkey>()
        .with_context(|| format!("Invalid {}", env::PROGRAM_ID))?;

    Ok(Config {
        rpc_url: get_env(env::RPC_URL)?,
        private_key: get_env(env::PRIVATE_KEY)?,
        program_id,
    })
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╔╦╗┬─┐┬┌─┐┌┬┐  ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
     ║║├┬┘│├┤  │   ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ═╩╝┴└─┴└   ┴   ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Liquidation Bot v0.1.0
    "#);
}
