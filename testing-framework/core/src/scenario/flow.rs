use std::collections::BTreeMap;

use async_trait::async_trait;
use testing_framework_config::{Amount, Dialect, GasConfig};
use tokio::time::sleep;
use tracing::info;

use super::{Checks, LeaseSet, Phase, RunContext, RunState, ScenarioError};
use crate::{
    convergence::query_balance,
    ledger::{Account, TransactionRecord, TxRequest},
};

/// Funds requested for one role: `amount` replicated `multiple` times, each
/// replication also covering the worst-case fee of `fee_txs` transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingRequest {
    pub amount: Amount,
    pub multiple: u32,
    pub fee: Amount,
    pub fee_txs: u64,
}

impl FundingRequest {
    /// Fee coverage per replication, `None` on overflow.
    #[must_use]
    pub fn fees(&self) -> Option<Amount> {
        self.fee.checked_mul(self.fee_txs)
    }
}

/// An account a scenario needs, provisioned before it executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleSpec {
    pub role: &'static str,
    pub shard: u32,
    pub funding: Option<FundingRequest>,
    /// Take the run's kept validator instead of provisioning a new account,
    /// and keep a freshly created one for later scenarios.
    pub reusable_validator: bool,
}

impl RoleSpec {
    #[must_use]
    pub const fn unfunded(role: &'static str, shard: u32) -> Self {
        Self {
            role,
            shard,
            funding: None,
            reusable_validator: false,
        }
    }

    #[must_use]
    pub const fn funded(role: &'static str, shard: u32, amount: Amount) -> Self {
        Self {
            role,
            shard,
            funding: Some(FundingRequest {
                amount,
                multiple: 1,
                fee: Amount::ZERO,
                fee_txs: 0,
            }),
            reusable_validator: false,
        }
    }

    #[must_use]
    pub fn with_multiple(mut self, multiple: u32) -> Self {
        if let Some(funding) = self.funding.as_mut() {
            funding.multiple = multiple;
        }
        self
    }

    /// Covers the worst-case fee of `txs` transactions under `gas` on top of
    /// the funded amount.
    #[must_use]
    pub fn paying_fees(mut self, gas: &GasConfig, txs: u64) -> Self {
        if let Some(funding) = self.funding.as_mut() {
            funding.fee = gas.max_fee();
            funding.fee_txs = txs;
        }
        self
    }

    #[must_use]
    pub const fn reusable_validator(mut self, reusable: bool) -> Self {
        self.reusable_validator = reusable;
        self
    }
}

/// Scenario-specific steps plugged into the orchestrator.
///
/// `execute` submits operations and captures whatever `verify` needs later.
/// Returning `Err` from either aborts the scenario.
#[async_trait]
pub trait ScenarioFlow: Send + Sync {
    type Snapshot: Send;

    fn name(&self) -> &'static str;

    fn roles(&self) -> Vec<RoleSpec>;

    async fn execute(&self, step: &mut Step<'_>) -> Result<Self::Snapshot, ScenarioError>;

    async fn verify(
        &self,
        step: &mut Step<'_>,
        snapshot: Self::Snapshot,
    ) -> Result<Checks, ScenarioError>;
}

/// View of the running scenario handed to flow steps.
pub struct Step<'a> {
    ctx: &'a RunContext,
    leases: &'a mut LeaseSet,
    reused: &'a BTreeMap<&'static str, Account>,
    run: &'a mut RunState,
}

impl<'a> Step<'a> {
    pub(crate) fn new(
        ctx: &'a RunContext,
        leases: &'a mut LeaseSet,
        reused: &'a BTreeMap<&'static str, Account>,
        run: &'a mut RunState,
    ) -> Self {
        Self {
            ctx,
            leases,
            reused,
            run,
        }
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        info!(from = %self.run.phase, to = %phase, "phase transition");
        self.run.phase = phase;
    }

    #[must_use]
    pub const fn ctx(&self) -> &'a RunContext {
        self.ctx
    }

    /// Account provisioned for `role`, leased or reused.
    pub fn account(&self, role: &'static str) -> Result<Account, ScenarioError> {
        self.leases
            .get(role)
            .map(|lease| lease.account().clone())
            .or_else(|| self.reused.get(role).cloned())
            .ok_or(ScenarioError::MissingRole { role })
    }

    /// True when `role` is the run's kept validator rather than a fresh
    /// account.
    #[must_use]
    pub fn is_reused(&self, role: &str) -> bool {
        self.reused.contains_key(role)
    }

    /// Submits a transaction and appends its record to the run.
    pub async fn send(&mut self, dialect: Dialect, request: &TxRequest) -> TransactionRecord {
        let record = self.ctx.send(dialect, request).await;
        self.run.transactions.push(record.clone());
        record
    }

    /// Flags `role` as a registered validator so teardown disables it.
    pub fn mark_validator(&mut self, role: &str, gas: GasConfig) {
        if let Some(lease) = self.leases.get_mut(role) {
            lease.mark_validator(gas);
        }
    }

    /// Makes teardown sweep `role` on `shard` as well.
    pub fn touch_shard(&mut self, role: &str, shard: u32) {
        if let Some(lease) = self.leases.get_mut(role) {
            lease.touch_shard(shard);
        }
    }

    /// Reads a balance with the run's query retry budget.
    pub async fn balance(&self, address: &str, shard: u32) -> Result<Amount, ScenarioError> {
        query_balance(
            self.ctx.ledger(),
            address,
            shard,
            self.ctx.settings().query_retry,
        )
        .await
        .map_err(|unmet| ScenarioError::query(format!("balance of {address} on shard {shard}"), unmet.error))
    }

    /// Optional pause after staking transactions before balances are read.
    pub async fn staking_pause(&self) {
        let wait = self.ctx.settings().staking_wait;
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}
