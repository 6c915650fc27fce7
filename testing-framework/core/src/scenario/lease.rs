use std::collections::BTreeSet;

use testing_framework_config::{Amount, Dialect, GasConfig, testcase::ValidatorChanges};
use tracing::{info, warn};

use super::RunContext;
use crate::{
    convergence::query_balance,
    ledger::{Account, TransactionRecord, TxPayload, TxRequest, ValidatorStatus},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Swept {
        amount: Amount,
        record: TransactionRecord,
    },
    /// Balance did not cover the sweep fee.
    Empty { balance: Amount },
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepRecord {
    pub shard: u32,
    pub outcome: SweepOutcome,
}

/// What happened when an account lease was released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownRecord {
    pub role: &'static str,
    pub account: String,
    pub address: String,
    pub disabled_validator: Option<TransactionRecord>,
    pub sweeps: Vec<SweepRecord>,
    pub removed: bool,
}

impl TeardownRecord {
    #[must_use]
    pub fn fully_swept(&self) -> bool {
        self.sweeps
            .iter()
            .all(|sweep| !matches!(sweep.outcome, SweepOutcome::Failed { .. }))
    }
}

/// An ephemeral account owned by one scenario. Releasing it sweeps its funds
/// back to the funding account.
#[derive(Debug)]
pub struct AccountLease {
    role: &'static str,
    account: Account,
    sweep_shards: BTreeSet<u32>,
    validator_gas: Option<GasConfig>,
    released: bool,
}

impl AccountLease {
    fn new(role: &'static str, account: Account) -> Self {
        let sweep_shards = BTreeSet::from([account.shard]);
        Self {
            role,
            account,
            sweep_shards,
            validator_gas: None,
            released: false,
        }
    }

    #[must_use]
    pub const fn role(&self) -> &'static str {
        self.role
    }

    #[must_use]
    pub const fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    /// Adds `shard` to the shards swept at release.
    pub fn touch_shard(&mut self, shard: u32) {
        self.sweep_shards.insert(shard);
    }

    /// Marks the account as a registered validator, disabled with `gas` before
    /// its funds are swept.
    pub fn mark_validator(&mut self, gas: GasConfig) {
        self.validator_gas = Some(gas);
    }

    #[must_use]
    pub const fn is_validator(&self) -> bool {
        self.validator_gas.is_some()
    }

    async fn release(mut self, ctx: &RunContext) -> TeardownRecord {
        self.released = true;
        let mut record = TeardownRecord {
            role: self.role,
            account: self.account.name.clone(),
            address: self.account.address.clone(),
            disabled_validator: None,
            sweeps: Vec::new(),
            removed: false,
        };

        if let Some(gas) = self.validator_gas {
            let request = TxRequest {
                sender: self.account.address.clone(),
                from_shard: self.account.shard,
                payload: TxPayload::EditValidator {
                    validator: self.account.address.clone(),
                    changes: ValidatorChanges::default(),
                    status: Some(ValidatorStatus::Inactive),
                },
                nonce: None,
                gas,
                timeout: ctx.funding().timeout(),
            };
            record.disabled_validator = Some(ctx.send(Dialect::Native, &request).await);
        }

        for shard in &self.sweep_shards {
            let outcome = self.sweep(ctx, *shard).await;
            if let SweepOutcome::Failed { reason } = &outcome {
                warn!(account = %self.account.name, address = %self.account.address, shard, %reason, "teardown sweep failed");
            }
            record.sweeps.push(SweepRecord {
                shard: *shard,
                outcome,
            });
        }

        if ctx.settings().remove_empty && record.fully_swept() {
            match ctx.keystore().remove(&self.account.name).await {
                Ok(()) => record.removed = true,
                Err(err) => {
                    warn!(account = %self.account.name, %err, "failed to remove account key");
                }
            }
        }

        info!(account = %self.account.name, role = self.role, removed = record.removed, "account released");
        record
    }

    async fn sweep(&self, ctx: &RunContext, shard: u32) -> SweepOutcome {
        let balance = match query_balance(
            ctx.ledger(),
            &self.account.address,
            shard,
            ctx.settings().query_retry,
        )
        .await
        {
            Ok(balance) => balance,
            Err(unmet) => {
                return SweepOutcome::Failed {
                    reason: unmet.to_string(),
                };
            }
        };

        let gas = ctx.funding().gas();
        let Some(amount) = balance
            .checked_sub(gas.max_fee())
            .filter(|amount| !amount.is_zero())
        else {
            return SweepOutcome::Empty { balance };
        };

        let request = TxRequest {
            sender: self.account.address.clone(),
            from_shard: shard,
            payload: TxPayload::Transfer {
                receiver: ctx.funding().address().to_owned(),
                to_shard: shard,
                amount,
                data: None,
            },
            nonce: None,
            gas,
            timeout: ctx.funding().timeout(),
        };
        let record = ctx.send(Dialect::Native, &request).await;
        if record.success {
            SweepOutcome::Swept { amount, record }
        } else {
            SweepOutcome::Failed {
                reason: record
                    .error
                    .unwrap_or_else(|| "sweep transaction rejected".to_owned()),
            }
        }
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                account = %self.account.name,
                address = %self.account.address,
                "account lease dropped without teardown; funds may be stranded"
            );
        }
    }
}

/// Every account lease held by one scenario run.
#[derive(Debug, Default)]
pub struct LeaseSet {
    leases: Vec<AccountLease>,
}

impl LeaseSet {
    pub fn acquire(&mut self, role: &'static str, account: Account) -> &mut AccountLease {
        self.leases.push(AccountLease::new(role, account));
        let last = self.leases.len() - 1;
        &mut self.leases[last]
    }

    #[must_use]
    pub fn get(&self, role: &str) -> Option<&AccountLease> {
        self.leases.iter().find(|lease| lease.role == role)
    }

    pub fn get_mut(&mut self, role: &str) -> Option<&mut AccountLease> {
        self.leases.iter_mut().find(|lease| lease.role == role)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Gives up the lease for `role` without sweeping it, handing the account
    /// and its validator gas back to the caller.
    pub fn retain(&mut self, role: &str) -> Option<(Account, Option<GasConfig>)> {
        let idx = self.leases.iter().position(|lease| lease.role == role)?;
        let mut lease = self.leases.remove(idx);
        lease.released = true;
        Some((lease.account.clone(), lease.validator_gas))
    }

    /// Releases every lease exactly once, most recent first.
    pub async fn release_all(&mut self, ctx: &RunContext) -> Vec<TeardownRecord> {
        let mut records = Vec::with_capacity(self.leases.len());
        while let Some(lease) = self.leases.pop() {
            records.push(lease.release(ctx).await);
        }
        records
    }
}
