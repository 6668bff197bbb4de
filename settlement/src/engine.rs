//! Main settlement engine
//!
//! Orchestrates one settlement cycle per call:
//!
//! 1. **Checks**: capability, continuation slot, input shapes, caller ranges
//! 2. **Accounting**: NAV before, period yield, compound, matching plan
//! 3. **Action**: deposit or redeem the net flow through the adapter
//! 4. **Finalization**: fee, dilution and deposit shares as one ledger batch
//!
//! When the adapter cannot finish within the call the cycle suspends: the
//! context is persisted and nothing touches the ledger until
//! [`SettlementEngine::settle_continue`] completes it.
//!
//! Every call is all-or-nothing. Ledger batches are checked before anything is
//! persisted, and the adapter is rolled back to its pre-call snapshot when a
//! call fails.

use crate::{
    access::{Capability, Role},
    adapter::{ActionOutcome, ExternalActionAdapter, StrategyAdapter},
    config::EngineConfig,
    continuation::{ContinuationKind, ContinuationState, PendingSettlement, SettlementContext},
    fees::{dilution_shares, fee_shares, FeeSplit, PlatformFees},
    matching::{MatchInputs, MatchOutcome, SettlementPlan},
    math::{add, mul_div, mul_div_signed, YIELD_FULL_PERCENT},
    metrics::Metrics,
    range::{PackedRange, SlippageCheck},
    state::{FileStateStore, MemoryStateStore, StateStore, StrategyState},
    types::{
        AssetGroup, ContinueParams, EmergencyReport, SettleParams, SettlementEvent,
        SettlementReport,
    },
    yield_tracker::{combine_yield_percentages, compound_yield_percentage, measure_protocol_yield},
    Error, Result,
};
use chrono::Utc;
use ledger_core::{HolderId, InMemoryShareLedger, ShareBatch, ShareLedger};
use std::time::Instant;
use uuid::Uuid;

/// Settlement engine for one strategy
pub struct SettlementEngine<A = StrategyAdapter, L = InMemoryShareLedger> {
    /// Configuration
    config: EngineConfig,

    /// Asset group
    group: AssetGroup,

    /// Holder of deposit and withdrawal shares
    vault: HolderId,

    /// Receiver of the initially locked shares
    locked: HolderId,

    /// External protocol adapter
    adapter: A,

    /// Share ledger
    ledger: L,

    /// Strategy state backend
    store: Box<dyn StateStore>,

    /// Last persisted strategy state
    state: StrategyState,

    /// Metrics
    metrics: Metrics,
}

/// Builder validating collaborators once
pub struct SettlementEngineBuilder<A, L> {
    config: EngineConfig,
    adapter: Option<A>,
    ledger: Option<L>,
    store: Option<Box<dyn StateStore>>,
    metrics: Option<Metrics>,
}

impl<A, L> SettlementEngineBuilder<A, L>
where
    A: ExternalActionAdapter + Clone,
    L: ShareLedger + Default,
{
    /// External protocol adapter
    pub fn adapter(mut self, adapter: A) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Share ledger; an empty default ledger otherwise
    pub fn ledger(mut self, ledger: L) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// State backend; derived from `state_path` otherwise
    pub fn store(mut self, store: Box<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Metrics collector; a fresh registry otherwise
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate configuration and collaborators, load persisted state
    pub fn build(self) -> Result<SettlementEngine<A, L>> {
        self.config.validate()?;

        let adapter = self
            .adapter
            .ok_or_else(|| Error::InvalidCollaborator("adapter not set".to_string()))?;

        let group = self.config.asset_group();
        let expected = adapter.expected_tokens();
        if expected != group.tokens() {
            return Err(Error::AssetGroupMismatch {
                configured: group.tokens(),
                expected,
            });
        }

        let store: Box<dyn StateStore> = match self.store {
            Some(store) => store,
            None => match &self.config.state_path {
                Some(path) => Box::new(FileStateStore::new(
                    path.clone(),
                    self.config.strategy_id.clone(),
                )),
                None => Box::new(MemoryStateStore::new()),
            },
        };
        let state = store.load()?.unwrap_or_default();

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new().map_err(|e| Error::Config(format!("metrics: {}", e)))?,
        };

        tracing::info!(
            strategy = %self.config.strategy_id,
            assets = ?group.tokens(),
            pending = !state.continuation.is_none(),
            "Settlement engine ready"
        );

        Ok(SettlementEngine {
            vault: self.config.vault_holder(),
            locked: self.config.locked_holder(),
            group,
            adapter,
            ledger: self.ledger.unwrap_or_default(),
            store,
            state,
            metrics,
            config: self.config,
        })
    }
}

/// Share batch and side effects of a finished cycle
struct Finalization {
    batch: ShareBatch,
    events: Vec<SettlementEvent>,
    fee_shares: FeeSplit,
    assets_withdrawn: Vec<u128>,
}

impl<A, L> SettlementEngine<A, L> {
    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Asset group
    pub fn asset_group(&self) -> &AssetGroup {
        &self.group
    }

    /// External protocol adapter
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// External protocol adapter, mutable (simulation and tests)
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Share ledger
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Persisted strategy state
    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Holder of deposit and withdrawal shares
    pub fn vault_holder(&self) -> &HolderId {
        &self.vault
    }

    /// Check if a cycle awaits continuation
    pub fn is_pending(&self) -> bool {
        !self.state.continuation.is_none()
    }
}

impl<A, L> SettlementEngine<A, L>
where
    A: ExternalActionAdapter + Clone,
    L: ShareLedger + Default,
{
    /// Start building an engine
    pub fn builder(config: EngineConfig) -> SettlementEngineBuilder<A, L> {
        SettlementEngineBuilder {
            config,
            adapter: None,
            ledger: None,
            store: None,
            metrics: None,
        }
    }

    /// USD worth of the external holdings
    pub fn usd_worth(&self, exchange_rates: &[u128]) -> Result<u128> {
        self.group.expect_len(exchange_rates)?;
        self.adapter.current_worth(&self.group, exchange_rates)
    }

    /// Run one settlement cycle
    pub fn settle(&mut self, cap: &Capability, params: SettleParams) -> Result<SettlementReport> {
        let started = Instant::now();
        let snapshot = self.adapter.clone();
        let result = self.run_settle(cap, &params);
        self.finish_call(result, snapshot, started)
    }

    /// Finish a suspended cycle
    pub fn settle_continue(
        &mut self,
        cap: &Capability,
        params: ContinueParams,
    ) -> Result<SettlementReport> {
        let started = Instant::now();
        let snapshot = self.adapter.clone();
        let result = self.run_continue(cap, &params);
        self.finish_call(result, snapshot, started)
    }

    /// Pull all holdings to `recipient`, bypassing matching and fees
    pub fn emergency_withdraw(
        &mut self,
        cap: &Capability,
        slippage_ranges: &[PackedRange],
        recipient: HolderId,
    ) -> Result<EmergencyReport> {
        let started = Instant::now();
        let snapshot = self.adapter.clone();
        let result = self.run_emergency(cap, slippage_ranges, recipient);
        self.finish_call(result, snapshot, started)
    }

    fn finish_call<T>(&mut self, result: Result<T>, snapshot: A, started: Instant) -> Result<T> {
        self.metrics.record_duration(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.adapter = snapshot;
            self.metrics.record_failure();
            tracing::warn!(
                strategy = %self.config.strategy_id,
                error = %e,
                class = ?e.class(),
                "Settlement call failed"
            );
        }
        result
    }

    fn run_settle(&mut self, cap: &Capability, params: &SettleParams) -> Result<SettlementReport> {
        // Step 1: Checks that need no measurement
        cap.require(Role::DoHardWorker)?;
        self.state.continuation.ensure_empty()?;

        self.group.expect_len(&params.deposited_assets)?;
        self.group.expect_len(&params.exchange_rates)?;
        params.slippage_ranges.validate(self.group.len())?;
        params.platform_fees.validate()?;
        for swap in &params.swap_instructions {
            swap.validate()?;
        }

        let w = params.withdrawal_shares;
        let vault_balance = self.ledger.balance_of(&self.vault);
        if w > vault_balance {
            return Err(Error::InsufficientShares {
                requested: w,
                available: vault_balance,
            });
        }

        let cycle_id = Uuid::now_v7();
        let rates = &params.exchange_rates;
        let ranges = &params.slippage_ranges;
        let mut events = Vec::new();

        tracing::info!(
            strategy = %self.config.strategy_id,
            %cycle_id,
            withdrawal_shares = %w,
            "Starting settlement cycle"
        );

        // Step 2: Range-checked before-values
        for (asset, (range, amount)) in ranges
            .deposit_amounts
            .iter()
            .zip(&params.deposited_assets)
            .enumerate()
        {
            observe(&mut events, range, SlippageCheck::DepositAmount { asset }, *amount)?;
        }
        observe(&mut events, &ranges.withdrawal_shares, SlippageCheck::WithdrawalShares, w)?;

        let nav_before = self.usd_worth(rates)?;
        observe(&mut events, &ranges.nav_before, SlippageCheck::NavBefore, nav_before)?;

        // Step 3: Yield and compound
        let (protocol_yield, yield_reference) =
            measure_protocol_yield(self.state.last_yield_reference, self.adapter.yield_reference())?;

        let compound = self.adapter.prepare_compound(&params.swap_instructions)?;
        self.group.expect_len(&compound)?;
        let compound_worth = self.group.worth(&compound, rates)?;
        observe(
            &mut events,
            &ranges.compound_worth,
            SlippageCheck::CompoundWorth,
            compound_worth,
        )?;

        let yield_percentage = combine_yield_percentages(
            combine_yield_percentages(protocol_yield, params.base_yield)?,
            compound_yield_percentage(compound_worth, nav_before)?,
        )?;

        // Step 4: Match flows
        let total_supply = self.ledger.total_supply();
        let bootstrap = total_supply < u128::from(self.config.bootstrap.initial_locked_shares);
        let deposit_worth = self.group.worth(&params.deposited_assets, rates)?;

        let plan = SettlementPlan::compute(&MatchInputs {
            deposits: &params.deposited_assets,
            compound: &compound,
            deposit_worth,
            compound_worth,
            withdrawal_shares: w,
            total_supply,
            nav_before,
            yield_percentage,
            fees: &params.platform_fees,
            bootstrap,
        })?;

        tracing::debug!(
            %cycle_id,
            outcome = ?plan.outcome,
            nav_before = %nav_before,
            deposit_worth = %deposit_worth,
            compound_worth = %compound_worth,
            withdrawal_worth = %plan.withdrawal_worth,
            matched_worth = %plan.matched_worth,
            yield_percentage = %yield_percentage,
            bootstrap,
            "Settlement plan computed"
        );

        let context = SettlementContext {
            cycle_id,
            value_before: nav_before,
            total_supply_snapshot: total_supply,
            withdrawal_shares: w,
            deposit_worth_share: plan.deposit_worth_share,
            compound_worth_share: plan.compound_worth_share,
            matched_deposit_worth: plan.matched_deposit_worth,
            withdrawal_worth: plan.withdrawal_worth,
            yield_percentage_snapshot: yield_percentage,
            withdrawal_fee_shares: plan.withdrawal_fee_shares,
            legacy_fee_shares: plan.legacy_fee_shares,
            deposit_shares: plan.deposit_shares,
            undeducted_withdrawal_shares: plan.undeducted_withdrawal_shares,
            reserved_assets: plan.reserved_assets.clone(),
            gross_deposits: params.deposited_assets.clone(),
            external_deposit: plan.external_deposit.clone(),
            platform_fees: params.platform_fees.clone(),
            bootstrap,
        };

        // Step 5: External action
        if compound.iter().any(|c| *c > 0) {
            self.adapter.claim_compound(&compound)?;
        }

        let action = match (plan.outcome, &plan.redeem) {
            (MatchOutcome::NetDeposit, _) => Some((
                ContinuationKind::DepositPending,
                self.adapter.initiate_deposit(&plan.external_deposit)?,
            )),
            (MatchOutcome::NetWithdrawal, Some(redeem)) => Some((
                ContinuationKind::WithdrawalPending,
                self.adapter.initiate_withdrawal(redeem)?,
            )),
            (MatchOutcome::NetWithdrawal, None) => {
                return Err(Error::ArithmeticOverflow("net withdrawal without redemption"))
            }
            (MatchOutcome::Exact, _) => None,
        };

        if let Some((kind, outcome)) = &action {
            if !outcome.finished {
                return self.suspend(*kind, outcome, context, yield_reference, events, rates);
            }
        }

        // Step 6: Finalize in the same call
        let returned = action
            .map(|(_, outcome)| outcome.assets)
            .unwrap_or_default();
        let nav_after = self.usd_worth(rates)?;

        let finalization = self.finalize(&context, nav_after, 0, &params.platform_fees, &returned)?;
        events.extend(finalization.events.iter().cloned());

        let report = self.commit(
            &context,
            finalization,
            yield_reference,
            nav_after,
            yield_percentage,
            events,
        )?;

        tracing::info!(
            strategy = %self.config.strategy_id,
            %cycle_id,
            shares_minted = %report.shares_minted,
            shares_burned = %report.shares_burned,
            fee_shares = %report.fee_shares.total(),
            nav_after = %nav_after,
            total_shares = %report.total_shares_after,
            "Settlement cycle finished"
        );
        Ok(report)
    }

    fn suspend(
        &mut self,
        kind: ContinuationKind,
        outcome: &ActionOutcome,
        context: SettlementContext,
        yield_reference: u128,
        mut events: Vec<SettlementEvent>,
        rates: &[u128],
    ) -> Result<SettlementReport> {
        let ticket = outcome.ticket.ok_or_else(|| {
            Error::Adapter("unfinished action returned no continuation ticket".to_string())
        })?;
        let cycle_id = context.cycle_id;
        let nav_before = context.value_before;
        let total_supply = context.total_supply_snapshot;
        let yield_percentage = context.yield_percentage_snapshot;

        let next = StrategyState {
            last_yield_reference: Some(yield_reference),
            continuation: ContinuationState::suspend(
                kind,
                PendingSettlement {
                    ticket,
                    initiated_at: Utc::now(),
                    context,
                },
            ),
        };
        let nav_after = self.usd_worth(rates)?;

        self.store.save(&next)?;
        self.state = next;

        events.push(SettlementEvent::ContinuationPersisted {
            cycle_id,
            kind,
            ticket,
        });
        self.metrics.record_pending();

        tracing::info!(
            strategy = %self.config.strategy_id,
            %cycle_id,
            ?kind,
            ticket = %ticket.ticket,
            "Settlement cycle suspended awaiting external action"
        );

        Ok(SettlementReport {
            cycle_id,
            pending: true,
            shares_minted: 0,
            shares_burned: 0,
            fee_shares: FeeSplit::default(),
            assets_withdrawn: vec![0; self.group.len()],
            nav_before,
            nav_after,
            total_shares_after: total_supply,
            yield_percentage,
            events,
            share_events: Vec::new(),
            continuation_ticket: Some(ticket),
        })
    }

    fn run_continue(
        &mut self,
        cap: &Capability,
        params: &ContinueParams,
    ) -> Result<SettlementReport> {
        cap.require(Role::DoHardWorker)?;
        let (kind, pending) = self.state.continuation.require()?;
        let pending = pending.clone();
        let context = &pending.context;

        if params.payload != pending.ticket {
            return Err(Error::Adapter(format!(
                "ticket {} does not belong to the pending cycle",
                params.payload.ticket
            )));
        }
        self.group.expect_len(&params.exchange_rates)?;
        params.platform_fees.validate()?;

        let outcome = match kind {
            ContinuationKind::DepositPending => self.adapter.continue_deposit(&params.payload)?,
            ContinuationKind::WithdrawalPending => {
                self.adapter.continue_withdrawal(&params.payload)?
            }
        };
        if !outcome.finished {
            tracing::debug!(cycle_id = %context.cycle_id, "External action not finished yet");
            return Err(Error::ActionNotFinished);
        }

        let nav_after = self.usd_worth(&params.exchange_rates)?;
        if kind == ContinuationKind::DepositPending && nav_after < context.value_before {
            return Err(Error::InvalidDepositContinuation {
                value_before: context.value_before,
                value_after: nav_after,
            });
        }

        // Yield of the legacy pool while the action was in flight
        let (protocol_yield, yield_reference) =
            measure_protocol_yield(self.state.last_yield_reference, self.adapter.yield_reference())?;
        let continuation_yield = combine_yield_percentages(protocol_yield, params.base_yield)?;
        let period_yield =
            combine_yield_percentages(context.yield_percentage_snapshot, continuation_yield)?;

        let finalization = self.finalize(
            context,
            nav_after,
            continuation_yield,
            &params.platform_fees,
            &outcome.assets,
        )?;
        let mut events = finalization.events.clone();
        events.push(SettlementEvent::ContinuationCleared {
            cycle_id: context.cycle_id,
        });

        let report = self.commit(
            context,
            finalization,
            yield_reference,
            nav_after,
            period_yield,
            events,
        )?;
        self.metrics.record_continuation();

        tracing::info!(
            strategy = %self.config.strategy_id,
            cycle_id = %context.cycle_id,
            ?kind,
            continuation_yield = %continuation_yield,
            shares_minted = %report.shares_minted,
            nav_after = %nav_after,
            "Continuation finished"
        );
        Ok(report)
    }

    /// Check the batch, persist the cleared state, then apply the batch
    fn commit(
        &mut self,
        context: &SettlementContext,
        finalization: Finalization,
        yield_reference: u128,
        nav_after: u128,
        yield_percentage: i128,
        events: Vec<SettlementEvent>,
    ) -> Result<SettlementReport> {
        self.ledger.check(&finalization.batch)?;

        let next = StrategyState {
            last_yield_reference: Some(yield_reference),
            continuation: ContinuationState::None,
        };
        self.store.save(&next)?;
        self.state = next;

        let share_events = self.ledger.apply(&finalization.batch)?;
        self.metrics
            .record_cycle(finalization.fee_shares.total(), nav_after);

        Ok(SettlementReport {
            cycle_id: context.cycle_id,
            pending: false,
            shares_minted: finalization.batch.total_minted(),
            shares_burned: finalization.batch.total_burned(),
            fee_shares: finalization.fee_shares,
            assets_withdrawn: finalization.assets_withdrawn,
            nav_before: context.value_before,
            nav_after,
            total_shares_after: self.ledger.total_supply(),
            yield_percentage,
            events,
            share_events,
            continuation_ticket: None,
        })
    }

    /// Share batch for a finished cycle
    ///
    /// `continuation_yield` is the legacy pool's yield while the action was in
    /// flight; zero for an atomic cycle.
    fn finalize(
        &self,
        context: &SettlementContext,
        nav_after: u128,
        continuation_yield: i128,
        continuation_fees: &PlatformFees,
        returned_assets: &[u128],
    ) -> Result<Finalization> {
        let cycle_id = context.cycle_id;
        let n0 = context.value_before;
        let w = context.withdrawal_shares;
        let mut batch = ShareBatch::new();
        let mut events = Vec::new();
        let mut fee_split = FeeSplit::default();

        // Realized increase from the in-flight deposit, net of legacy growth
        let legacy_growth = mul_div_signed(continuation_yield, n0, YIELD_FULL_PERCENT)?;
        let action_delta = to_signed(nav_after)? - to_signed(n0)? - legacy_growth;
        let external_worth = add(context.deposit_worth_share, context.compound_worth_share)?;

        batch.burn(self.vault.clone(), w);

        let (deposit_shares_minted, deposit_worth_realized) = if context.bootstrap {
            // All realized value belongs to the depositors
            let realized = add(nav_after.saturating_sub(n0), context.matched_deposit_worth)?;
            let minted = realized
                .checked_mul(u128::from(self.config.bootstrap.initial_share_multiplier))
                .ok_or(Error::ArithmeticOverflow("bootstrap shares"))?;

            let locked = if context.total_supply_snapshot == 0 {
                minted.min(u128::from(self.config.bootstrap.initial_locked_shares))
            } else {
                0
            };
            batch.mint(self.locked.clone(), locked);
            batch.mint(self.vault.clone(), minted - locked);
            (minted - locked, realized)
        } else {
            batch.mint(self.vault.clone(), context.deposit_shares);

            let first_pass = add(context.legacy_fee_shares, context.withdrawal_fee_shares)?;
            let first_split = context.platform_fees.split(first_pass)?;
            mint_fees(&mut batch, &context.platform_fees, first_split);
            fee_split.merge(first_split);

            let supply_after_fees = add(
                context.total_supply_snapshot - context.undeducted_withdrawal_shares,
                first_pass,
            )?;
            let second_pass = fee_shares(supply_after_fees, continuation_yield, continuation_fees)?;
            let second_split = continuation_fees.split(second_pass)?;
            mint_fees(&mut batch, continuation_fees, second_split);
            fee_split.merge(second_split);

            let realized_deposit = if action_delta > 0 && external_worth > 0 {
                mul_div(action_delta as u128, context.deposit_worth_share, external_worth)?
            } else {
                0
            };

            let supply_now = add(supply_after_fees, second_pass)?;
            let legacy_worth = nav_after.saturating_sub(realized_deposit);
            let new_shares = if realized_deposit == 0 {
                0
            } else if supply_now == 0 || legacy_worth == 0 {
                realized_deposit
                    .checked_mul(u128::from(self.config.bootstrap.initial_share_multiplier))
                    .ok_or(Error::ArithmeticOverflow("deposit shares"))?
            } else {
                dilution_shares(supply_now, realized_deposit, legacy_worth)?
            };
            batch.mint(self.vault.clone(), new_shares);

            (
                add(context.deposit_shares, new_shares)?,
                add(context.matched_deposit_worth, realized_deposit)?,
            )
        };

        let assets_withdrawn = context
            .reserved_assets
            .iter()
            .enumerate()
            .map(|(i, reserved)| add(*reserved, returned_assets.get(i).copied().unwrap_or(0)))
            .collect::<Result<Vec<_>>>()?;

        if context.gross_deposits.iter().any(|a| *a > 0) || deposit_shares_minted > 0 {
            events.push(SettlementEvent::Deposited {
                cycle_id,
                shares_minted: deposit_shares_minted,
                worth_realized: deposit_worth_realized,
                gross_amounts: context.gross_deposits.clone(),
                net_amounts: context.external_deposit.clone(),
            });
        }
        if w > 0 {
            events.push(SettlementEvent::Withdrawn {
                cycle_id,
                shares_burned: w,
                worth: context.withdrawal_worth,
                assets: assets_withdrawn.clone(),
            });
        }
        if fee_split.total() > 0 {
            events.push(SettlementEvent::FeesCollected {
                cycle_id,
                yield_percentage: combine_yield_percentages(
                    context.yield_percentage_snapshot,
                    continuation_yield,
                )?,
                shares: fee_split,
            });
        }

        Ok(Finalization {
            batch,
            events,
            fee_shares: fee_split,
            assets_withdrawn,
        })
    }

    fn run_emergency(
        &mut self,
        cap: &Capability,
        slippage_ranges: &[PackedRange],
        recipient: HolderId,
    ) -> Result<EmergencyReport> {
        cap.require(Role::EmergencyWithdrawalExecutor)?;
        if recipient.is_empty() {
            return Err(Error::InvalidCollaborator(
                "emergency recipient is empty".to_string(),
            ));
        }
        if slippage_ranges.len() != self.group.len() {
            return Err(Error::InvalidSlippageRanges(format!(
                "{} emergency ranges for {} assets",
                slippage_ranges.len(),
                self.group.len()
            )));
        }

        let outcome = self.adapter.emergency_withdraw(slippage_ranges)?;
        if !outcome.finished {
            return Err(Error::EmergencyWithdrawalIncomplete);
        }
        self.group.expect_len(&outcome.assets)?;

        // Reserved matched assets of an abandoned cycle go out as well
        let abandoned = self.state.continuation.pending().cloned();
        let mut assets = outcome.assets;
        if let Some(pending) = &abandoned {
            for (asset, reserved) in assets.iter_mut().zip(&pending.context.reserved_assets) {
                *asset = add(*asset, *reserved)?;
            }
        }
        let abandoned_cycle = abandoned.map(|p| p.context.cycle_id);

        let next = StrategyState {
            last_yield_reference: self.state.last_yield_reference,
            continuation: ContinuationState::None,
        };
        self.store.save(&next)?;
        self.state = next;
        self.metrics.record_emergency();

        tracing::warn!(
            strategy = %self.config.strategy_id,
            %recipient,
            assets = ?assets,
            abandoned_cycle = ?abandoned_cycle,
            "Emergency withdrawal executed"
        );

        let events = vec![SettlementEvent::EmergencyWithdrawn {
            recipient: recipient.clone(),
            assets: assets.clone(),
            abandoned_cycle,
        }];
        Ok(EmergencyReport {
            recipient,
            assets,
            abandoned_cycle,
            events,
        })
    }
}

impl<A, L> std::fmt::Debug for SettlementEngine<A, L>
where
    A: std::fmt::Debug,
    L: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("strategy_id", &self.config.strategy_id)
            .field("adapter", &self.adapter)
            .field("ledger", &self.ledger)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<A, L> std::fmt::Debug for SettlementEngineBuilder<A, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngineBuilder")
            .field("strategy_id", &self.config.strategy_id)
            .field("has_adapter", &self.adapter.is_some())
            .finish_non_exhaustive()
    }
}

/// Range-check a value and record it
fn observe(
    events: &mut Vec<SettlementEvent>,
    range: &PackedRange,
    check: SlippageCheck,
    value: u128,
) -> Result<()> {
    range.check(check, value)?;
    events.push(SettlementEvent::SlippageObserved { check, value });
    Ok(())
}

fn mint_fees(batch: &mut ShareBatch, fees: &PlatformFees, split: FeeSplit) {
    batch
        .mint(fees.ecosystem_receiver.clone(), split.ecosystem)
        .mint(fees.treasury_receiver.clone(), split.treasury);
}

fn to_signed(value: u128) -> Result<i128> {
    i128::try_from(value).map_err(|_| Error::ArithmeticOverflow("worth exceeds i128"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{InstantVault, PoolBook, QueuedVault},
        config::{AssetConfig, BootstrapConfig},
        range::SlippageRanges,
    };

    const MULTIPLIER: u64 = 1_000_000;

    fn config() -> EngineConfig {
        EngineConfig {
            assets: vec![AssetConfig {
                token: "USD".to_string(),
                decimals: 0,
            }],
            bootstrap: BootstrapConfig {
                initial_locked_shares: 1_000,
                initial_share_multiplier: MULTIPLIER,
            },
            ..Default::default()
        }
    }

    fn engine(adapter: StrategyAdapter) -> SettlementEngine {
        SettlementEngine::builder(config())
            .adapter(adapter)
            .build()
            .unwrap()
    }

    fn instant() -> SettlementEngine {
        engine(InstantVault::new(PoolBook::new(vec!["USD".to_string()])).into())
    }

    fn queued() -> SettlementEngine {
        engine(QueuedVault::new(PoolBook::new(vec!["USD".to_string()])).into())
    }

    fn keeper() -> Capability {
        Capability::new("keeper").with_role(Role::DoHardWorker)
    }

    fn fees() -> PlatformFees {
        PlatformFees {
            ecosystem_fee: 1_000,
            treasury_fee: 500,
            ecosystem_receiver: HolderId::new("ecosystem"),
            treasury_receiver: HolderId::new("treasury"),
        }
    }

    fn params(deposit: u128, withdrawal_shares: u128) -> SettleParams {
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

    #[test]
    fn test_builder_rejects_asset_mismatch() {
        let result = SettlementEngine::<StrategyAdapter>::builder(config())
            .adapter(StrategyAdapter::from(InstantVault::new(PoolBook::new(vec![
                "DAI".to_string(),
            ]))))
            .build();
        assert!(matches!(result, Err(Error::AssetGroupMismatch { .. })));
    }

    #[test]
    fn test_builder_requires_adapter() {
        let result = SettlementEngine::<StrategyAdapter, InMemoryShareLedger>::builder(config())
            .build();
        assert!(matches!(result, Err(Error::InvalidCollaborator(_))));
    }

    #[test]
    fn test_bootstrap_deposit() {
        let mut engine = instant();
        let report = engine.settle(&keeper(), params(1_000, 0)).unwrap();

        assert!(!report.pending);
        assert_eq!(report.shares_minted, 1_000 * u128::from(MULTIPLIER));
        assert_eq!(report.fee_shares.total(), 0);
        assert_eq!(report.nav_after, 1_000);
        assert_eq!(engine.ledger().balance_of(&HolderId::new("locked-shares")), 1_000);
        assert_eq!(
            engine.ledger().balance_of(engine.vault_holder()),
            1_000 * u128::from(MULTIPLIER) - 1_000
        );
    }

    #[test]
    fn test_unauthorized_settle() {
        let mut engine = instant();
        let stranger = Capability::new("stranger");
        assert!(matches!(
            engine.settle(&stranger, params(1_000, 0)),
            Err(Error::Unauthorized { .. })
        ));
        assert_eq!(engine.metrics().failures_total.get(), 1);
    }

    #[test]
    fn test_range_failure_leaves_state_untouched() {
        let mut engine = instant();
        let mut p = params(1_000, 0);
        p.slippage_ranges.deposit_amounts[0] = PackedRange::pack(0, 999);

        assert!(matches!(
            engine.settle(&keeper(), p),
            Err(Error::SlippageCheckFailed {
                check: SlippageCheck::DepositAmount { asset: 0 },
                ..
            })
        ));
        assert_eq!(engine.ledger().total_supply(), 0);
        assert_eq!(engine.state().last_yield_reference, None);
        assert_eq!(engine.usd_worth(&[1]).unwrap(), 0);
    }

    #[test]
    fn test_withdrawal_above_vault_balance_rejected() {
        let mut engine = instant();
        assert!(matches!(
            engine.settle(&keeper(), params(0, 1)),
            Err(Error::InsufficientShares { requested: 1, available: 0 })
        ));
    }

    #[test]
    fn test_queued_deposit_suspends_without_ledger_mutation() {
        let mut engine = queued();
        let report = engine.settle(&keeper(), params(1_000, 0)).unwrap();

        assert!(report.pending);
        assert!(report.continuation_ticket.is_some());
        assert_eq!(engine.ledger().total_supply(), 0);
        assert!(engine.is_pending());
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, SettlementEvent::ContinuationPersisted { .. })));

        // No overlapping cycles
        assert!(matches!(
            engine.settle(&keeper(), params(0, 0)),
            Err(Error::ContinuationOutstanding)
        ));
    }

    #[test]
    fn test_continue_before_protocol_finishes() {
        let mut engine = queued();
        let ticket = engine
            .settle(&keeper(), params(1_000, 0))
            .unwrap()
            .continuation_ticket
            .unwrap();

        let continue_params = ContinueParams {
            payload: ticket,
            exchange_rates: vec![1],
            base_yield: 0,
            platform_fees: fees(),
        };
        let err = engine
            .settle_continue(&keeper(), continue_params.clone())
            .unwrap_err();
        assert!(err.needs_continuation_retry());
        assert!(engine.is_pending());

        engine.adapter_mut().process_queue().unwrap();
        let report = engine.settle_continue(&keeper(), continue_params).unwrap();
        assert!(!report.pending);
        assert_eq!(report.shares_minted, 1_000 * u128::from(MULTIPLIER));
        assert!(!engine.is_pending());
    }

    #[test]
    fn test_continue_without_pending_cycle() {
        let mut engine = instant();
        let result = engine.settle_continue(
            &keeper(),
            ContinueParams {
                payload: crate::adapter::ContinuationPayload::issue(),
                exchange_rates: vec![1],
                base_yield: 0,
                platform_fees: fees(),
            },
        );
        assert!(matches!(result, Err(Error::NoContinuation)));
    }
}
