//! Actor-based access to the settlement engine
//!
//! One task owns the engine; callers talk to it through a cloneable
//! [`SettlementHandle`]. Calls for one strategy are processed strictly in
//! mailbox order, so a settlement call never observes another one half done.
//!
//! ```text
//! SettlementHandle (Clone) ──mpsc (bounded)──▶ SettlementActor ──▶ SettlementEngine
//!          ▲                                        │
//!          └──────────────── oneshot ───────────────┘
//! ```

use crate::{
    access::Capability,
    adapter::{ExternalActionAdapter, StrategyAdapter},
    engine::SettlementEngine,
    range::PackedRange,
    state::StrategyState,
    types::{ContinueParams, EmergencyReport, SettleParams, SettlementReport},
    Error, Result,
};
use ledger_core::{HolderId, InMemoryShareLedger, ShareLedger};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Closure run against the adapter inside the actor
pub type AdapterCommand<A> = Box<dyn FnOnce(&mut A) -> Result<()> + Send>;

/// Engine state visible to callers
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    /// Persisted strategy state
    pub state: StrategyState,

    /// Share supply
    pub total_supply: u128,

    /// Shares held by the vault holder
    pub vault_shares: u128,
}

/// Message sent to the settlement actor
pub enum SettlementMessage<A> {
    /// Run one settlement cycle
    Settle {
        capability: Capability,
        params: Box<SettleParams>,
        response: oneshot::Sender<Result<SettlementReport>>,
    },

    /// Finish a suspended cycle
    Continue {
        capability: Capability,
        params: ContinueParams,
        response: oneshot::Sender<Result<SettlementReport>>,
    },

    /// Pull all holdings out
    EmergencyWithdraw {
        capability: Capability,
        slippage_ranges: Vec<PackedRange>,
        recipient: HolderId,
        response: oneshot::Sender<Result<EmergencyReport>>,
    },

    /// USD worth of the external holdings
    UsdWorth {
        exchange_rates: Vec<u128>,
        response: oneshot::Sender<Result<u128>>,
    },

    /// Current state
    Snapshot {
        response: oneshot::Sender<EngineSnapshot>,
    },

    /// Drive the adapter (simulation and tests)
    Adapter {
        command: AdapterCommand<A>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

impl<A> std::fmt::Debug for SettlementMessage<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SettlementMessage::Settle { .. } => "Settle",
            SettlementMessage::Continue { .. } => "Continue",
            SettlementMessage::EmergencyWithdraw { .. } => "EmergencyWithdraw",
            SettlementMessage::UsdWorth { .. } => "UsdWorth",
            SettlementMessage::Snapshot { .. } => "Snapshot",
            SettlementMessage::Adapter { .. } => "Adapter",
            SettlementMessage::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Actor owning one strategy's engine
pub struct SettlementActor<A = StrategyAdapter, L = InMemoryShareLedger> {
    engine: SettlementEngine<A, L>,
    mailbox: mpsc::Receiver<SettlementMessage<A>>,
}

impl<A, L> std::fmt::Debug for SettlementActor<A, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementActor")
            .field("strategy_id", &self.engine.config().strategy_id)
            .finish_non_exhaustive()
    }
}

impl<A, L> SettlementActor<A, L>
where
    A: ExternalActionAdapter + Clone + Send + 'static,
    L: ShareLedger + Default + Send + 'static,
{
    /// Create new actor
    pub fn new(engine: SettlementEngine<A, L>, mailbox: mpsc::Receiver<SettlementMessage<A>>) -> Self {
        Self { engine, mailbox }
    }

    /// Run the actor event loop until shutdown or until every handle is dropped
    pub async fn run(mut self) -> SettlementEngine<A, L> {
        while let Some(msg) = self.mailbox.recv().await {
            if let SettlementMessage::Shutdown = msg {
                tracing::info!(
                    strategy = %self.engine.config().strategy_id,
                    "Settlement actor shutting down"
                );
                break;
            }
            self.handle_message(msg);
        }
        self.engine
    }

    fn handle_message(&mut self, msg: SettlementMessage<A>) {
        match msg {
            SettlementMessage::Settle {
                capability,
                params,
                response,
            } => {
                let result = self.engine.settle(&capability, *params);
                let _ = response.send(result);
            }

            SettlementMessage::Continue {
                capability,
                params,
                response,
            } => {
                let result = self.engine.settle_continue(&capability, params);
                let _ = response.send(result);
            }

            SettlementMessage::EmergencyWithdraw {
                capability,
                slippage_ranges,
                recipient,
                response,
            } => {
                let result =
                    self.engine
                        .emergency_withdraw(&capability, &slippage_ranges, recipient);
                let _ = response.send(result);
            }

            SettlementMessage::UsdWorth {
                exchange_rates,
                response,
            } => {
                let _ = response.send(self.engine.usd_worth(&exchange_rates));
            }

            SettlementMessage::Snapshot { response } => {
                let snapshot = EngineSnapshot {
                    state: self.engine.state().clone(),
                    total_supply: self.engine.ledger().total_supply(),
                    vault_shares: self
                        .engine
                        .ledger()
                        .balance_of(self.engine.vault_holder()),
                };
                let _ = response.send(snapshot);
            }

            SettlementMessage::Adapter { command, response } => {
                let _ = response.send(command(self.engine.adapter_mut()));
            }

            SettlementMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

/// Handle for sending messages to the actor
pub struct SettlementHandle<A = StrategyAdapter> {
    sender: mpsc::Sender<SettlementMessage<A>>,
}

impl<A> Clone for SettlementHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A> std::fmt::Debug for SettlementHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementHandle")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<A> SettlementHandle<A> {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<SettlementMessage<A>>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SettlementMessage<A>,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Actor("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Actor("Response channel closed".to_string()))
    }

    /// Run one settlement cycle
    pub async fn settle(
        &self,
        capability: Capability,
        params: SettleParams,
    ) -> Result<SettlementReport> {
        self.request(|response| SettlementMessage::Settle {
            capability,
            params: Box::new(params),
            response,
        })
        .await?
    }

    /// Finish a suspended cycle
    pub async fn settle_continue(
        &self,
        capability: Capability,
        params: ContinueParams,
    ) -> Result<SettlementReport> {
        self.request(|response| SettlementMessage::Continue {
            capability,
            params,
            response,
        })
        .await?
    }

    /// Pull all holdings to `recipient`
    pub async fn emergency_withdraw(
        &self,
        capability: Capability,
        slippage_ranges: Vec<PackedRange>,
        recipient: HolderId,
    ) -> Result<EmergencyReport> {
        self.request(|response| SettlementMessage::EmergencyWithdraw {
            capability,
            slippage_ranges,
            recipient,
            response,
        })
        .await?
    }

    /// USD worth of the external holdings
    pub async fn usd_worth(&self, exchange_rates: Vec<u128>) -> Result<u128> {
        self.request(|response| SettlementMessage::UsdWorth {
            exchange_rates,
            response,
        })
        .await?
    }

    /// Current state
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(|response| SettlementMessage::Snapshot { response })
            .await
    }

    /// Run `command` against the adapter inside the actor
    pub async fn with_adapter(
        &self,
        command: impl FnOnce(&mut A) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        self.request(|response| SettlementMessage::Adapter {
            command: Box::new(command),
            response,
        })
        .await?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SettlementMessage::Shutdown)
            .await
            .map_err(|_| Error::Actor("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the settlement actor
///
/// The join handle yields the engine back once the actor stops.
pub fn spawn_settlement_actor<A, L>(
    engine: SettlementEngine<A, L>,
    mailbox_size: usize,
) -> (SettlementHandle<A>, JoinHandle<SettlementEngine<A, L>>)
where
    A: ExternalActionAdapter + Clone + Send + 'static,
    L: ShareLedger + Default + Send + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_size.max(1)); // Bounded channel for backpressure
    let actor = SettlementActor::new(engine, rx);
    let task = tokio::spawn(actor.run());
    (SettlementHandle::new(tx), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::Role,
        adapter::{InstantVault, PoolBook},
        config::{AssetConfig, BootstrapConfig, EngineConfig},
        fees::PlatformFees,
        range::SlippageRanges,
    };

    fn engine() -> SettlementEngine {
        let config = EngineConfig {
            assets: vec![AssetConfig {
                token: "USD".to_string(),
                decimals: 0,
            }],
            bootstrap: BootstrapConfig {
                initial_locked_shares: 1_000,
                initial_share_multiplier: 1_000_000,
            },
            ..Default::default()
        };
        SettlementEngine::builder(config)
            .adapter(InstantVault::new(PoolBook::new(vec!["USD".to_string()])).into())
            .build()
            .unwrap()
    }

    fn deposit(amount: u128) -> SettleParams {
        SettleParams {
            deposited_assets: vec![amount],
            withdrawal_shares: 0,
            base_yield: 0,
            exchange_rates: vec![1],
            slippage_ranges: SlippageRanges::unbounded(1),
            swap_instructions: vec![],
            platform_fees: PlatformFees::none(HolderId::new("eco"), HolderId::new("tre")),
        }
    }

    #[tokio::test]
    async fn test_settle_through_actor() {
        let (handle, task) = spawn_settlement_actor(engine(), 4);
        let keeper = Capability::new("keeper").with_role(Role::DoHardWorker);

        let report = handle.settle(keeper, deposit(1_000)).await.unwrap();
        assert_eq!(report.shares_minted, 1_000_000_000);
        assert_eq!(handle.usd_worth(vec![1]).await.unwrap(), 1_000);

        handle
            .with_adapter(|adapter| adapter.book_mut().accrue(500))
            .await
            .unwrap();
        assert_eq!(handle.usd_worth(vec![1]).await.unwrap(), 1_050);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_supply, 1_000_000_000);
        assert!(snapshot.state.continuation.is_none());

        handle.shutdown().await.unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.ledger().total_supply(), 1_000_000_000);
        assert!(handle.usd_worth(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_errors_cross_the_mailbox() {
        let (handle, _task) = spawn_settlement_actor(engine(), 4);
        let result = handle.settle(Capability::new("stranger"), deposit(1)).await;
        assert!(matches!(result, Err(Error::Unauthorized { .. })));
    }

    #[test]
    fn test_actor_debug_names_the_strategy() {
        let (_tx, rx) = mpsc::channel(1);
        let actor: SettlementActor = SettlementActor::new(engine(), rx);
        let rendered = format!("{:?}", actor);
        assert!(rendered.starts_with("SettlementActor"));
        assert!(rendered.contains("strategy-0"));
    }
}
