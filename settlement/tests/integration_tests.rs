//! Integration tests for the settlement engine
//!
//! Drives whole strategy lifetimes through the public API:
//! - Bootstrap, fee collection and deposit dilution
//! - Internal matching of deposits against withdrawals
//! - Reward compounding and yield accrued while a cycle is suspended
//! - Suspended cycles and their continuation
//! - Emergency withdrawal and state recovery from disk

use ledger_core::{HolderId, ShareLedger};
use rust_decimal::prelude::*;
use strategy_settlement::{
    adapter::{InstantVault, PoolBook, QueuedVault, SwapInstruction},
    config::{AssetConfig, BootstrapConfig},
    Capability, ContinueParams, EngineConfig, Error, FileStateStore, PackedRange, PlatformFees,
    Role, SettleParams, SettlementEngine, SettlementEvent, SettlementReport, SlippageRanges,
    StrategyAdapter,
};

const MULTIPLIER: u128 = 1_000_000;
const LOCKED_FLOOR: u128 = 1_000;
const FIVE_PERCENT_BPS: i64 = 500;

fn config() -> EngineConfig {
    EngineConfig {
        strategy_id: "usd-lending".to_string(),
        assets: vec![AssetConfig {
            token: "USD".to_string(),
            decimals: 0,
        }],
        bootstrap: BootstrapConfig {
            initial_locked_shares: LOCKED_FLOOR as u64,
            initial_share_multiplier: MULTIPLIER as u64,
        },
        ..Default::default()
    }
}

fn book() -> PoolBook {
    PoolBook::new(vec!["USD".to_string()])
}

fn build(adapter: StrategyAdapter) -> SettlementEngine {
    SettlementEngine::builder(config())
        .adapter(adapter)
        .build()
        .expect("engine builds")
}

/// Worth of `shares` out of `supply` in a pool worth `nav`
fn worth_of(shares: u128, supply: u128, nav: u128) -> Decimal {
    let [shares, supply, nav] = [shares, supply, nav].map(|v| Decimal::from_u128(v).unwrap());
    shares / supply * nav
}

fn assert_close(actual: Decimal, expected: Decimal) {
    assert!(
        (actual - expected).abs() < Decimal::new(1, 4),
        "{} is not close to {}",
        actual,
        expected
    );
}

fn keeper() -> Capability {
    Capability::new("keeper").with_role(Role::DoHardWorker)
}

fn guardian() -> Capability {
    Capability::new("guardian").with_role(Role::EmergencyWithdrawalExecutor)
}

fn fees() -> PlatformFees {
    PlatformFees {
        ecosystem_fee: 1_000,
        treasury_fee: 500,
        ecosystem_receiver: HolderId::new("ecosystem"),
        treasury_receiver: HolderId::new("treasury"),
    }
}

fn settle_params(deposit: u128, withdrawal_shares: u128) -> SettleParams {
    SettleParams {
        deposited_assets: vec![deposit],
        withdrawal_shares,
        base_yield: 0,
        exchange_rates: vec![1],
        slippage_ranges: SlippageRanges::unbounded(1),
        swap_instructions: vec![],
        platform_fees: fees(),
    }
}

fn continue_params(report: &SettlementReport) -> ContinueParams {
    ContinueParams {
        payload: report.continuation_ticket.expect("cycle is pending"),
        exchange_rates: vec![1],
        base_yield: 0,
        platform_fees: fees(),
    }
}

/// Queued engine with 1000 USD bootstrapped and continued
fn bootstrapped_queued() -> SettlementEngine {
    let mut engine = build(QueuedVault::new(book()).into());
    let pending = engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();
    engine.adapter_mut().process_queue().unwrap();
    engine
        .settle_continue(&keeper(), continue_params(&pending))
        .unwrap();
    engine
}

#[test]
fn test_bootstrap_then_five_percent_yield() {
    let mut engine = build(InstantVault::new(book()).into());

    // Bootstrap: every unit of worth is backed by MULTIPLIER shares
    let report = engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();
    assert_eq!(report.shares_minted, 1_000_000_000);
    assert_eq!(report.total_shares_after, 1_000_000_000);
    assert_eq!(
        engine.ledger().balance_of(&HolderId::new("locked-shares")),
        LOCKED_FLOOR
    );

    // Protocol grows 5%
    engine
        .adapter_mut()
        .book_mut()
        .accrue(FIVE_PERCENT_BPS)
        .unwrap();
    let report = engine.settle(&keeper(), settle_params(0, 0)).unwrap();

    assert_eq!(report.yield_percentage, 50_000_000_000);
    assert_eq!(report.yield_percent(), Some(Decimal::from(5u8)));
    assert_eq!(report.nav_before, 1_050);
    assert_eq!(report.fee_shares.total(), 7_194_244);
    assert_eq!(report.fee_shares.ecosystem, 4_796_162);
    assert_eq!(report.fee_shares.treasury, 2_398_082);
    assert_eq!(
        engine.ledger().balance_of(&HolderId::new("ecosystem")),
        4_796_162
    );
    assert_eq!(
        engine.ledger().balance_of(&HolderId::new("treasury")),
        2_398_082
    );

    // Fee shares are worth 15% of the yield
    let supply = Decimal::from(1_000_000_000u64);
    let fee = Decimal::from(7_194_244u64);
    let fee_worth = fee / (supply + fee) * Decimal::from(1_050u64);
    assert!((fee_worth - Decimal::new(75, 1)).abs() < Decimal::new(1, 4));

    engine.ledger().verify_conservation().unwrap();
}

#[test]
fn test_zero_yield_cycle_changes_nothing() {
    let mut engine = build(InstantVault::new(book()).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();
    let supply = engine.ledger().total_supply();

    let report = engine.settle(&keeper(), settle_params(0, 0)).unwrap();
    assert_eq!(report.shares_minted, 0);
    assert_eq!(report.shares_burned, 0);
    assert_eq!(report.fee_shares.total(), 0);
    assert_eq!(report.nav_after, report.nav_before);
    assert_eq!(engine.ledger().total_supply(), supply);
    assert!(report
        .events
        .iter()
        .all(|e| matches!(e, SettlementEvent::SlippageObserved { .. })));
}

#[test]
fn test_deposit_dilutes_without_moving_share_price() {
    let mut engine = build(InstantVault::new(book()).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();
    engine
        .adapter_mut()
        .book_mut()
        .accrue(FIVE_PERCENT_BPS)
        .unwrap();
    engine.settle(&keeper(), settle_params(0, 0)).unwrap();
    let supply = engine.ledger().total_supply();
    assert_eq!(supply, 1_007_194_244);

    // 105 USD into a 1050 USD pool mints a tenth of the supply
    let report = engine.settle(&keeper(), settle_params(105, 0)).unwrap();
    assert_eq!(report.shares_minted, 100_719_424);
    assert_eq!(report.nav_after, 1_155);
    assert_eq!(report.fee_shares.total(), 0);
    engine.ledger().verify_conservation().unwrap();
}

#[test]
fn test_compound_charges_fee_and_stays_with_holders() {
    let pool = book().with_reward_tokens(vec!["CRV".to_string()]);
    let mut engine = build(InstantVault::new(pool).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();

    // Rewards worth 5% of the pool wait to be swapped
    engine.adapter_mut().book_mut().add_rewards(&[50]).unwrap();
    let mut params = settle_params(100, 0);
    params.swap_instructions = vec![SwapInstruction {
        reward_token: "CRV".to_string(),
        swap_target: "router".to_string(),
        data: vec![0x01],
    }];
    let report = engine.settle(&keeper(), params).unwrap();

    assert!(!report.pending);
    assert_eq!(report.yield_percentage, 50_000_000_000);
    assert_eq!(report.nav_after, 1_150);
    assert_eq!(report.fee_shares.ecosystem, 4_796_162);
    assert_eq!(report.fee_shares.treasury, 2_398_082);
    // The depositor is priced against the pool with the compound but not the fee
    let deposit_shares = report.shares_minted - report.fee_shares.total();
    assert_eq!(deposit_shares, 95_923_261);
    assert_eq!(report.total_shares_after, 1_103_117_505);
    assert!(report.events.iter().any(|e| matches!(
        e,
        SettlementEvent::Deposited {
            worth_realized: 100,
            ..
        }
    )));

    // Compound is claimed exactly once
    let again = engine.adapter().book().quote_compound(&[SwapInstruction {
        reward_token: "CRV".to_string(),
        swap_target: "router".to_string(),
        data: vec![0x01],
    }]);
    assert_eq!(again.unwrap(), vec![0]);

    let supply = report.total_shares_after;
    let nav = report.nav_after;
    // 15% of the 50 USD compound
    assert_close(worth_of(report.fee_shares.total(), supply, nav), Decimal::new(75, 1));
    assert_close(worth_of(deposit_shares, supply, nav), Decimal::from(100u8));
    assert_close(worth_of(1_000_000_000, supply, nav), Decimal::new(10425, 1));
    engine.ledger().verify_conservation().unwrap();
}

#[test]
fn test_deposit_matched_against_withdrawal() {
    let mut engine = build(InstantVault::new(book()).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();

    // 300 in, 100 out: 100 stays internal, 200 reaches the protocol
    let report = engine
        .settle(&keeper(), settle_params(300, 100_000_000))
        .unwrap();

    assert!(!report.pending);
    assert_eq!(report.assets_withdrawn, vec![100]);
    assert_eq!(report.nav_after, 1_200);
    assert_eq!(report.shares_burned, 100_000_000);
    // 100M handed over from the withdrawers plus 200M new
    assert_eq!(report.shares_minted, 300_000_000);
    assert_eq!(report.total_shares_after, 1_200_000_000);
    assert!(report.events.iter().any(|e| matches!(
        e,
        SettlementEvent::Deposited {
            worth_realized: 300,
            ..
        }
    )));
    engine.ledger().verify_conservation().unwrap();
}

#[test]
fn test_queued_net_withdrawal() {
    let mut engine = bootstrapped_queued();
    assert_eq!(engine.ledger().total_supply(), 1_000_000_000);

    let pending = engine
        .settle(&keeper(), settle_params(0, 100_000_000))
        .unwrap();
    assert!(pending.pending);
    assert_eq!(engine.ledger().total_supply(), 1_000_000_000);

    engine.adapter_mut().process_queue().unwrap();
    let report = engine
        .settle_continue(&keeper(), continue_params(&pending))
        .unwrap();

    assert_eq!(report.cycle_id, pending.cycle_id);
    assert_eq!(report.assets_withdrawn, vec![100]);
    assert_eq!(report.shares_burned, 100_000_000);
    assert_eq!(report.nav_after, 900);
    assert_eq!(engine.ledger().total_supply(), 900_000_000);
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, SettlementEvent::ContinuationCleared { .. })));
    assert!(!engine.is_pending());
}

#[test]
fn test_pending_cycle_blocks_new_cycles() {
    let mut engine = bootstrapped_queued();
    engine.settle(&keeper(), settle_params(100, 0)).unwrap();

    let state = engine.state().clone();
    let supply = engine.ledger().total_supply();
    let worth = engine.usd_worth(&[1]).unwrap();

    let result = engine.settle(&keeper(), settle_params(50, 0));
    assert!(matches!(result, Err(Error::ContinuationOutstanding)));

    assert_eq!(engine.state(), &state);
    assert_eq!(engine.ledger().total_supply(), supply);
    assert_eq!(engine.usd_worth(&[1]).unwrap(), worth);
}

#[test]
fn test_continue_retries_until_protocol_finishes() {
    let mut engine = bootstrapped_queued();
    let pending = engine.settle(&keeper(), settle_params(100, 0)).unwrap();

    for _ in 0..3 {
        let err = engine
            .settle_continue(&keeper(), continue_params(&pending))
            .unwrap_err();
        assert!(matches!(err, Error::ActionNotFinished));
    }

    engine.adapter_mut().process_queue().unwrap();
    let report = engine
        .settle_continue(&keeper(), continue_params(&pending))
        .unwrap();
    // 100 USD into a 1000 USD pool
    assert_eq!(report.shares_minted, 100_000_000);
    assert_eq!(engine.metrics().continuations_total.get(), 2);
}

#[test]
fn test_yield_during_continuation_charged_before_deposit() {
    let mut engine = bootstrapped_queued();
    let pending = engine.settle(&keeper(), settle_params(100, 0)).unwrap();
    assert_eq!(pending.yield_percentage, 0);

    // Pool grows 5% before the protocol takes the deposit
    engine
        .adapter_mut()
        .book_mut()
        .accrue(FIVE_PERCENT_BPS)
        .unwrap();
    engine.adapter_mut().process_queue().unwrap();
    let report = engine
        .settle_continue(&keeper(), continue_params(&pending))
        .unwrap();

    // 1000 * 1.05 plus 95 principal units at the new index
    assert_eq!(report.nav_after, 1_149);
    assert_eq!(report.yield_percentage, 50_000_000_000);
    assert_eq!(report.fee_shares.total(), 7_194_244);
    assert_eq!(
        engine.ledger().balance_of(&HolderId::new("ecosystem")),
        4_796_162
    );
    let deposit_shares = report.shares_minted - report.fee_shares.total();
    assert_eq!(deposit_shares, 94_964_028);
    assert_eq!(report.total_shares_after, 1_102_158_272);
    assert!(report.events.iter().any(|e| matches!(
        e,
        SettlementEvent::Deposited {
            worth_realized: 99,
            ..
        }
    )));

    let supply = report.total_shares_after;
    let nav = report.nav_after;
    assert_close(worth_of(report.fee_shares.total(), supply, nav), Decimal::new(75, 1));
    assert_close(worth_of(deposit_shares, supply, nav), Decimal::from(99u8));
    assert_close(worth_of(1_000_000_000, supply, nav), Decimal::new(10425, 1));
    engine.ledger().verify_conservation().unwrap();
}

#[test]
fn test_deposit_continuation_below_value_before() {
    let mut engine = bootstrapped_queued();
    let pending = engine.settle(&keeper(), settle_params(100, 0)).unwrap();

    // Protocol loses half its value while the deposit is queued
    engine.adapter_mut().book_mut().accrue(-5_000).unwrap();
    engine.adapter_mut().process_queue().unwrap();

    let result = engine.settle_continue(&keeper(), continue_params(&pending));
    assert!(matches!(
        result,
        Err(Error::InvalidDepositContinuation {
            value_before: 1_000,
            value_after: 600,
        })
    ));
    assert!(engine.is_pending());
    assert_eq!(engine.ledger().total_supply(), 1_000_000_000);
}

#[test]
fn test_continue_with_foreign_ticket() {
    let mut engine = bootstrapped_queued();
    let pending = engine.settle(&keeper(), settle_params(100, 0)).unwrap();

    let mut params = continue_params(&pending);
    params.payload = strategy_settlement::ContinuationPayload::issue();
    assert!(matches!(
        engine.settle_continue(&keeper(), params),
        Err(Error::Adapter(_))
    ));
    assert!(engine.is_pending());
}

#[test]
fn test_emergency_withdraw_abandons_continuation() {
    let mut engine = bootstrapped_queued();
    let pending = engine.settle(&keeper(), settle_params(100, 0)).unwrap();
    let ranges = vec![PackedRange::unbounded()];
    let recipient = HolderId::new("guardian-safe");

    // Request still with the protocol
    let result = engine.emergency_withdraw(&guardian(), &ranges, recipient.clone());
    assert!(matches!(result, Err(Error::EmergencyWithdrawalIncomplete)));
    assert!(engine.is_pending());

    engine.adapter_mut().process_queue().unwrap();
    let report = engine
        .emergency_withdraw(&guardian(), &ranges, recipient.clone())
        .unwrap();

    assert_eq!(report.assets, vec![1_100]);
    assert_eq!(report.abandoned_cycle, Some(pending.cycle_id));
    assert_eq!(report.recipient, recipient);
    assert!(!engine.is_pending());
    assert_eq!(engine.usd_worth(&[1]).unwrap(), 0);
    assert_eq!(engine.metrics().emergency_total.get(), 1);
}

#[test]
fn test_emergency_range_violation_keeps_holdings() {
    let mut engine = build(InstantVault::new(book()).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();

    let result = engine.emergency_withdraw(
        &guardian(),
        &[PackedRange::pack(2_000, u128::MAX)],
        HolderId::new("guardian-safe"),
    );
    assert!(matches!(result, Err(Error::SlippageCheckFailed { .. })));
    assert_eq!(engine.usd_worth(&[1]).unwrap(), 1_000);
}

#[test]
fn test_roles_are_enforced() {
    let mut engine = build(InstantVault::new(book()).into());

    assert!(matches!(
        engine.settle(&guardian(), settle_params(1_000, 0)),
        Err(Error::Unauthorized {
            role: Role::DoHardWorker,
            ..
        })
    ));
    assert!(matches!(
        engine.emergency_withdraw(
            &keeper(),
            &[PackedRange::unbounded()],
            HolderId::new("safe")
        ),
        Err(Error::Unauthorized {
            role: Role::EmergencyWithdrawalExecutor,
            ..
        })
    ));
    assert_eq!(engine.ledger().total_supply(), 0);
}

#[test]
fn test_asset_group_mismatch_at_build() {
    let mut config = config();
    config.assets.push(AssetConfig {
        token: "EUR".to_string(),
        decimals: 2,
    });
    let result = SettlementEngine::<StrategyAdapter>::builder(config)
        .adapter(InstantVault::new(book()).into())
        .build();
    assert!(matches!(result, Err(Error::AssetGroupMismatch { .. })));
}

#[test]
fn test_pending_cycle_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usd-lending.state");

    let mut engine: SettlementEngine = SettlementEngine::builder(config())
        .adapter(StrategyAdapter::from(QueuedVault::new(book())))
        .store(Box::new(FileStateStore::new(&path, "usd-lending")))
        .build()
        .unwrap();
    let pending = engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();
    assert!(pending.pending);

    // Restart with the same protocol and ledger
    let adapter = engine.adapter().clone();
    let ledger = engine.ledger().clone();
    drop(engine);

    let mut engine: SettlementEngine = SettlementEngine::builder(config())
        .adapter(adapter)
        .ledger(ledger)
        .store(Box::new(FileStateStore::new(&path, "usd-lending")))
        .build()
        .unwrap();
    assert!(engine.is_pending());

    engine.adapter_mut().process_queue().unwrap();
    let report = engine
        .settle_continue(&keeper(), continue_params(&pending))
        .unwrap();
    assert_eq!(report.shares_minted, 1_000_000_000);
    assert!(!engine.is_pending());

    // A store for another strategy refuses the file
    let other = SettlementEngine::<StrategyAdapter>::builder(config())
        .adapter(StrategyAdapter::from(QueuedVault::new(book())))
        .store(Box::new(FileStateStore::new(&path, "other")))
        .build();
    assert!(matches!(other, Err(Error::Storage(_))));
}

#[test]
fn test_slippage_ranges_on_nav() {
    let mut engine = build(InstantVault::new(book()).into());
    engine.settle(&keeper(), settle_params(1_000, 0)).unwrap();

    let mut params = settle_params(0, 0);
    params.slippage_ranges.nav_before = PackedRange::pack(1_001, 2_000);
    assert!(matches!(
        engine.settle(&keeper(), params),
        Err(Error::SlippageCheckFailed {
            value: 1_000,
            min: 1_001,
            ..
        })
    ));
    assert_eq!(engine.metrics().failures_total.get(), 1);
    assert_eq!(engine.metrics().cycles_total.get(), 1);
}

#[tokio::test]
async fn test_actor_runs_a_queued_cycle() {
    let engine = build(QueuedVault::new(book()).into());
    let (handle, task) = strategy_settlement::spawn_settlement_actor(engine, 8);

    let pending = handle.settle(keeper(), settle_params(1_000, 0)).await.unwrap();
    assert!(pending.pending);
    assert!(handle.snapshot().await.unwrap().state.continuation.kind().is_some());

    handle
        .with_adapter(|adapter| adapter.process_queue())
        .await
        .unwrap();
    let report = handle
        .settle_continue(keeper(), continue_params(&pending))
        .await
        .unwrap();
    assert_eq!(report.total_shares_after, 1_000_000_000);

    handle.shutdown().await.unwrap();
    let engine = task.await.unwrap();
    assert!(!engine.is_pending());
}
