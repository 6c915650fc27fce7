use async_trait::async_trait;
use testing_framework_config::{Amount, testcase::StakingParams};
use testing_framework_core::{
    ledger::{Account, Delegation},
    scenario::{Checks, RoleSpec, ScenarioError, ScenarioFlow, Step},
};
use tracing::info;

use super::{
    Addressing, DELEGATOR, SENDER, Target, VALIDATOR,
    staking::{
        Staged, await_delegation, delegate_with, ensure_validator, fee_payer_role,
        undelegate_with, validator_role, wait_next_epoch,
    },
};

/// Validator and delegator a delegation scenario works with.
pub struct Pair {
    validator: Account,
    delegator: Account,
}

fn delegator_role(params: &StakingParams, amount: Amount, txs: u64) -> RoleSpec {
    RoleSpec::funded(DELEGATOR, params.from_shard, amount).paying_fees(&params.gas, txs)
}

fn target_role(params: &StakingParams, target: Target) -> RoleSpec {
    match target {
        Target::Registered => validator_role(params, 0),
        Target::Unregistered => RoleSpec::unfunded(VALIDATOR, params.from_shard),
    }
}

/// Provides the validator and the delegator, creating the validator if needed.
async fn prepare(step: &mut Step<'_>, params: &StakingParams) -> Result<Staged<Pair>, ScenarioError> {
    let delegator = step.account(DELEGATOR)?;
    let (validator, record) = ensure_validator(step, params, params.nonce).await?;
    if let Some(record) = record.filter(|record| !record.success) {
        return Ok(Staged::halted("validator created", &record));
    }
    Ok(Staged::Ready(Pair {
        validator,
        delegator,
    }))
}

/// Provides the pair for `target`. An unregistered validator is a bare
/// account that never registers.
async fn prepare_for(
    step: &mut Step<'_>,
    params: &StakingParams,
    target: Target,
) -> Result<Staged<Pair>, ScenarioError> {
    match target {
        Target::Registered => prepare(step, params).await,
        Target::Unregistered => Ok(Staged::Ready(Pair {
            validator: step.account(VALIDATOR)?,
            delegator: step.account(DELEGATOR)?,
        })),
    }
}

/// Delegates to the scenario's validator, self-signed or through a foreign
/// sender, or to an address that never registered.
pub struct DelegateFlow {
    params: StakingParams,
    addressing: Addressing,
    target: Target,
}

impl DelegateFlow {
    #[must_use]
    pub const fn new(params: StakingParams, addressing: Addressing, target: Target) -> Self {
        Self {
            params,
            addressing,
            target,
        }
    }
}

#[async_trait]
impl ScenarioFlow for DelegateFlow {
    type Snapshot = Staged<Pair>;

    fn name(&self) -> &'static str {
        match (self.addressing, self.target) {
            (Addressing::Mismatched, _) => "delegate_invalid_address",
            (Addressing::Standard, Target::Registered) => "delegate",
            (Addressing::Standard, Target::Unregistered) => "delegate_non_existing",
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let amount = params.delegation.amount;
        let mut roles = vec![
            target_role(params, self.target),
            delegator_role(params, amount, 2),
        ];
        if self.addressing == Addressing::Mismatched {
            roles.push(RoleSpec::funded(SENDER, params.from_shard, amount).paying_fees(&params.gas, 2));
        }
        roles
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<Staged<Pair>, ScenarioError> {
        let params = &self.params;
        let pair = match prepare_for(step, params, self.target).await? {
            Staged::Ready(pair) => pair,
            halted @ Staged::Halted(_) => return Ok(halted),
        };

        let sender = match self.addressing {
            Addressing::Standard => pair.delegator.clone(),
            Addressing::Mismatched => step.account(SENDER)?,
        };
        let record = delegate_with(
            step,
            params,
            &sender,
            &pair.delegator.address,
            &pair.validator.address,
            params.delegation.delegate,
            None,
        )
        .await;
        if !record.success {
            return Ok(Staged::halted("delegation accepted", &record));
        }
        Ok(Staged::Ready(pair))
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        staged: Staged<Pair>,
    ) -> Result<Checks, ScenarioError> {
        let pair = match staged {
            Staged::Ready(pair) => pair,
            Staged::Halted(checks) => return Ok(checks),
        };
        let mut checks = Checks::new();
        // Nothing to observe on an unregistered validator beyond acceptance.
        if self.target == Target::Unregistered {
            return Ok(checks);
        }

        let delegate = self.params.delegation.delegate;
        checks.condition(
            format!("delegation of at least {delegate} visible"),
            await_delegation(
                step,
                &pair.delegator.address,
                &pair.validator.address,
                |delegation| delegation.amount >= delegate,
            )
            .await,
        );
        Ok(checks)
    }
}

/// Delegates, then takes part of the stake back. The undelegation may be
/// signed by a foreign sender or aimed at an address that never registered.
pub struct UndelegateFlow {
    params: StakingParams,
    addressing: Addressing,
    target: Target,
}

impl UndelegateFlow {
    #[must_use]
    pub const fn new(params: StakingParams, addressing: Addressing, target: Target) -> Self {
        Self {
            params,
            addressing,
            target,
        }
    }
}

#[async_trait]
impl ScenarioFlow for UndelegateFlow {
    type Snapshot = Staged<Pair>;

    fn name(&self) -> &'static str {
        match (self.addressing, self.target) {
            (Addressing::Mismatched, _) => "undelegate_invalid_address",
            (Addressing::Standard, Target::Registered) => "undelegate",
            (Addressing::Standard, Target::Unregistered) => "undelegate_non_existing",
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let mut roles = vec![
            target_role(params, self.target),
            delegator_role(params, params.delegation.amount, 3),
        ];
        if self.addressing == Addressing::Mismatched {
            roles.push(fee_payer_role(SENDER, params, 1));
        }
        roles
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<Staged<Pair>, ScenarioError> {
        let params = &self.params;
        let delegation = &params.delegation;
        let pair = match prepare_for(step, params, self.target).await? {
            Staged::Ready(pair) => pair,
            halted @ Staged::Halted(_) => return Ok(halted),
        };

        if self.target == Target::Registered {
            let record = delegate_with(
                step,
                params,
                &pair.delegator,
                &pair.delegator.address,
                &pair.validator.address,
                delegation.delegate,
                None,
            )
            .await;
            if !record.success {
                return Ok(Staged::halted("delegation accepted", &record));
            }
        }

        let sender = match self.addressing {
            Addressing::Standard => pair.delegator.clone(),
            Addressing::Mismatched => step.account(SENDER)?,
        };
        let record = undelegate_with(
            step,
            params,
            &sender,
            &pair.delegator.address,
            &pair.validator.address,
            delegation.undelegate,
        )
        .await;
        if !record.success {
            return Ok(Staged::halted("undelegation accepted", &record));
        }
        Ok(Staged::Ready(pair))
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        staged: Staged<Pair>,
    ) -> Result<Checks, ScenarioError> {
        let pair = match staged {
            Staged::Ready(pair) => pair,
            Staged::Halted(checks) => return Ok(checks),
        };
        let mut checks = Checks::new();
        if self.target == Target::Unregistered {
            return Ok(checks);
        }

        let delegation = &self.params.delegation;
        let remaining = delegation.delegate.saturating_sub(delegation.undelegate);
        checks.condition(
            format!("delegation reduced to {remaining} with a pending undelegation"),
            await_delegation(
                step,
                &pair.delegator.address,
                &pair.validator.address,
                |found| found.amount == remaining && !found.undelegations.is_empty(),
            )
            .await,
        );
        Ok(checks)
    }
}

/// Delegates, undelegates and delegates again, optionally across an epoch
/// boundary. The second delegation draws on the still locked undelegation.
pub struct RedelegateFlow {
    params: StakingParams,
    next_epoch: bool,
}

pub struct Redelegation {
    pair: Pair,
    initial: Amount,
    balance_before: Amount,
}

impl RedelegateFlow {
    #[must_use]
    pub const fn new(params: StakingParams, next_epoch: bool) -> Self {
        Self { params, next_epoch }
    }

    fn initial(&self) -> Amount {
        let fallback = if self.next_epoch { 2_000 } else { 1_000 };
        self.params
            .delegation
            .initial
            .unwrap_or(Amount::from_whole(fallback))
    }

    fn expected(&self, delegation: &Delegation, initial: Amount) -> bool {
        let params = &self.params.delegation;
        initial
            .saturating_sub(params.undelegate)
            .checked_add(params.delegate)
            .is_some_and(|expected| delegation.amount == expected)
    }
}

#[async_trait]
impl ScenarioFlow for RedelegateFlow {
    type Snapshot = Staged<Redelegation>;

    fn name(&self) -> &'static str {
        if self.next_epoch {
            "redelegate_next_epoch"
        } else {
            "redelegate"
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let delegation = &params.delegation;
        let drawn = delegation.delegate.saturating_sub(delegation.undelegate);
        let needed = self.initial().checked_add(drawn).unwrap_or(delegation.amount);
        vec![
            validator_role(params, 0),
            delegator_role(params, delegation.amount.max(needed), 4),
        ]
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<Staged<Redelegation>, ScenarioError> {
        let params = &self.params;
        let delegation = &params.delegation;
        let initial = self.initial();
        let pair = match prepare(step, params).await? {
            Staged::Ready(pair) => pair,
            Staged::Halted(checks) => return Ok(Staged::Halted(checks)),
        };
        let (delegator, validator) = (&pair.delegator, pair.validator.address.as_str());

        let record =
            delegate_with(step, params, delegator, &delegator.address, validator, initial, None)
                .await;
        if !record.success {
            return Ok(Staged::halted("initial delegation accepted", &record));
        }

        let record = undelegate_with(
            step,
            params,
            delegator,
            &delegator.address,
            validator,
            delegation.undelegate,
        )
        .await;
        if !record.success {
            return Ok(Staged::halted("undelegation accepted", &record));
        }

        if self.next_epoch {
            let epoch = wait_next_epoch(step, params.from_shard).await?;
            info!(epoch, "crossed epoch boundary");
        }

        let balance_before = step.balance(&delegator.address, params.from_shard).await?;
        let record = delegate_with(
            step,
            params,
            delegator,
            &delegator.address,
            validator,
            delegation.delegate,
            None,
        )
        .await;
        if !record.success {
            return Ok(Staged::halted("redelegation accepted", &record));
        }

        Ok(Staged::Ready(Redelegation {
            pair,
            initial,
            balance_before,
        }))
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        staged: Staged<Redelegation>,
    ) -> Result<Checks, ScenarioError> {
        let Redelegation {
            pair,
            initial,
            balance_before,
        } = match staged {
            Staged::Ready(redelegation) => redelegation,
            Staged::Halted(checks) => return Ok(checks),
        };
        let params = &self.params;
        let mut checks = Checks::new();

        checks.condition(
            "delegation restored by redelegation",
            await_delegation(
                step,
                &pair.delegator.address,
                &pair.validator.address,
                |found| self.expected(found, initial),
            )
            .await,
        );

        // Only the part not covered by the locked undelegation leaves the
        // balance.
        let drawn = params
            .delegation
            .delegate
            .saturating_sub(params.delegation.undelegate);
        let expected = balance_before.saturating_sub(drawn);
        let fee = params.gas.max_fee();
        let ending = step
            .balance(&pair.delegator.address, params.from_shard)
            .await?;
        checks.record(
            "redelegation drew on locked tokens",
            ending <= expected && ending.within(expected, fee),
            format!("expected {expected} minus at most {fee}, observed {ending}"),
        );
        Ok(checks)
    }
}
