//! Settlement simulation binary
//!
//! Runs a scripted strategy lifetime against a queued vault through the
//! settlement actor and prints every report as JSON.
//!
//! Usage: `settle-sim [config.toml]`; without a path the configuration is
//! read from `SETTLEMENT_*` environment variables.

use anyhow::{bail, Context};
use strategy_settlement::{
    adapter::{PoolBook, QueuedVault},
    spawn_settlement_actor, Capability, ContinueParams, EngineConfig, Role, SettleParams,
    SettlementEngine, SettlementHandle, SettlementReport, SlippageRanges, StrategyAdapter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::from_env().context("loading config from environment")?,
    };
    tracing::info!(strategy = %config.strategy_id, "Starting settlement simulation");

    let group = config.asset_group();
    let fees = config.fees.to_platform_fees()?;
    let mailbox_size = config.actor.mailbox_size;
    let rates = vec![1u128; group.len()];
    let one_thousand: Vec<u128> = group
        .assets()
        .iter()
        .map(|a| 1_000 * 10u128.pow(u32::from(a.decimals)))
        .collect();

    let adapter = StrategyAdapter::from(QueuedVault::new(PoolBook::new(group.tokens())));
    let engine: SettlementEngine = SettlementEngine::builder(config)
        .adapter(adapter)
        .build()?;
    let (handle, task) = spawn_settlement_actor(engine, mailbox_size);

    let keeper = Capability::new("sim-keeper").with_role(Role::DoHardWorker);
    let settle = |deposited_assets: Vec<u128>, withdrawal_shares: u128| SettleParams {
        deposited_assets,
        withdrawal_shares,
        base_yield: 0,
        exchange_rates: rates.clone(),
        slippage_ranges: SlippageRanges::unbounded(group.len()),
        swap_instructions: vec![],
        platform_fees: fees.clone(),
    };

    // Cycle 1: bootstrap deposit, queued by the protocol
    let pending = handle.settle(keeper.clone(), settle(one_thousand.clone(), 0)).await?;
    print_report("bootstrap (initiated)", &pending)?;
    let report = finish(&handle, &keeper, &pending, &rates, &fees).await?;
    print_report("bootstrap (continued)", &report)?;

    // Cycle 2: 5% protocol growth, a tenth of the vault shares redeemed
    handle
        .with_adapter(|adapter| adapter.book_mut().accrue(500))
        .await?;
    let vault_shares = handle.snapshot().await?.vault_shares;
    let pending = handle
        .settle(keeper.clone(), settle(vec![0; group.len()], vault_shares / 10))
        .await?;
    print_report("withdrawal (initiated)", &pending)?;
    let report = finish(&handle, &keeper, &pending, &rates, &fees).await?;
    print_report("withdrawal (continued)", &report)?;

    // Cycle 3: deposit matched against a withdrawal
    let vault_shares = handle.snapshot().await?.vault_shares;
    let report = handle
        .settle(keeper.clone(), settle(one_thousand, vault_shares / 20))
        .await?;
    print_report("matched deposit", &report)?;
    if report.pending {
        let report = finish(&handle, &keeper, &report, &rates, &fees).await?;
        print_report("matched deposit (continued)", &report)?;
    }

    let worth = handle.usd_worth(rates.clone()).await?;
    let snapshot = handle.snapshot().await?;
    tracing::info!(
        nav = %worth,
        total_supply = %snapshot.total_supply,
        "Simulation finished"
    );

    handle.shutdown().await?;
    let engine = task.await.context("settlement actor panicked")?;
    let families = engine.metrics().registry().gather();
    tracing::info!(metric_families = families.len(), "Metrics gathered");
    Ok(())
}

/// Let the protocol process the queue, then continue the cycle
async fn finish(
    handle: &SettlementHandle,
    keeper: &Capability,
    pending: &SettlementReport,
    rates: &[u128],
    fees: &strategy_settlement::PlatformFees,
) -> anyhow::Result<SettlementReport> {
    let Some(payload) = pending.continuation_ticket else {
        bail!("cycle {} is not pending", pending.cycle_id);
    };
    handle.with_adapter(|adapter| adapter.process_queue()).await?;
    let report = handle
        .settle_continue(
            keeper.clone(),
            ContinueParams {
                payload,
                exchange_rates: rates.to_vec(),
                base_yield: 0,
                platform_fees: fees.clone(),
            },
        )
        .await?;
    Ok(report)
}

fn print_report(label: &str, report: &SettlementReport) -> anyhow::Result<()> {
    println!("== {} ==", label);
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
