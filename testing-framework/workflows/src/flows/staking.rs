use testing_framework_config::{
    Amount, Dialect,
    testcase::{StakingParams, ValidatorChanges},
    timeouts::EPOCH_CAPTURE_ATTEMPTS,
};
use testing_framework_core::{
    DynError,
    convergence::{RetryPolicy, Unmet, await_condition, await_epoch_after, capture_epoch},
    ledger::{Account, Delegation, TransactionRecord, TxPayload, TxRequest, ValidatorInfo},
    scenario::{Checks, RoleSpec, ScenarioError, Step},
};
use tracing::info;

use super::VALIDATOR;

/// Balance handed to an account that only pays fees.
const FEE_FLOAT: Amount = Amount::from_whole(1);

/// Outcome of the execute step. `Halted` carries the failed checks of an
/// operation that was refused, so verification is skipped.
pub enum Staged<T> {
    Ready(T),
    Halted(Checks),
}

impl<T> Staged<T> {
    pub(crate) fn halted(label: impl Into<String>, record: &TransactionRecord) -> Self {
        Self::unmet(
            label,
            record.error.clone().unwrap_or_else(|| "refused".to_owned()),
        )
    }

    pub(crate) fn unmet(label: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut checks = Checks::new();
        checks.record(label, false, detail);
        Self::Halted(checks)
    }
}

/// Validator role funded for its self delegation, `edits` edits and the
/// disabling edit at teardown.
pub(crate) fn validator_role(params: &StakingParams, edits: u64) -> RoleSpec {
    RoleSpec::funded(VALIDATOR, params.from_shard, params.create.amount)
        .paying_fees(&params.gas, 2 + edits)
        .reusable_validator(params.reuse_existing_validator)
}

/// `role` funded only for the fees of `txs` transactions.
pub(crate) fn fee_payer_role(role: &'static str, params: &StakingParams, txs: u64) -> RoleSpec {
    RoleSpec::funded(role, params.from_shard, FEE_FLOAT).paying_fees(&params.gas, txs)
}

pub(crate) fn staking_request(
    params: &StakingParams,
    sender: &Account,
    payload: TxPayload,
    nonce: Option<u64>,
) -> TxRequest {
    TxRequest {
        sender: sender.address.clone(),
        from_shard: params.from_shard,
        payload,
        nonce,
        gas: params.gas,
        timeout: params.timeout(),
    }
}

pub(crate) fn create_payload(
    params: &StakingParams,
    validator: &str,
    bls_keys: Vec<String>,
) -> TxPayload {
    let create = &params.create;
    TxPayload::CreateValidator {
        validator: validator.to_owned(),
        description: create.description.clone(),
        commission: create.commission,
        min_self_delegation: create.min_self_delegation,
        max_total_delegation: create.max_total_delegation,
        amount: create.amount,
        bls_keys,
    }
}

/// The scenario's validator: the run's kept validator when reused, otherwise
/// created now. The record is `None` for a reused validator.
pub(crate) async fn ensure_validator(
    step: &mut Step<'_>,
    params: &StakingParams,
    nonce: Option<u64>,
) -> Result<(Account, Option<TransactionRecord>), ScenarioError> {
    let validator = step.account(VALIDATOR)?;
    if step.is_reused(VALIDATOR) {
        info!(address = %validator.address, "using kept validator");
        return Ok((validator, None));
    }

    let request = staking_request(
        params,
        &validator,
        create_payload(params, &validator.address, params.create.bls_keys.clone()),
        nonce,
    );
    let record = step.send(Dialect::Native, &request).await;
    if record.success {
        step.mark_validator(VALIDATOR, params.gas);
    }
    step.staking_pause().await;
    Ok((validator, Some(record)))
}

/// Delegates `amount` from `delegator` to `validator`, signed by `sender`.
pub(crate) async fn delegate_with(
    step: &mut Step<'_>,
    params: &StakingParams,
    sender: &Account,
    delegator: &str,
    validator: &str,
    amount: Amount,
    nonce: Option<u64>,
) -> TransactionRecord {
    info!(delegator, validator, %amount, "delegating");
    let payload = TxPayload::Delegate {
        delegator: delegator.to_owned(),
        validator: validator.to_owned(),
        amount,
    };
    let record = step
        .send(
            Dialect::Native,
            &staking_request(params, sender, payload, nonce),
        )
        .await;
    step.staking_pause().await;
    record
}

/// Takes `amount` of `delegator`'s stake back from `validator`, signed by
/// `sender`.
pub(crate) async fn undelegate_with(
    step: &mut Step<'_>,
    params: &StakingParams,
    sender: &Account,
    delegator: &str,
    validator: &str,
    amount: Amount,
) -> TransactionRecord {
    info!(delegator, validator, %amount, "undelegating");
    let payload = TxPayload::Undelegate {
        delegator: delegator.to_owned(),
        validator: validator.to_owned(),
        amount,
    };
    let record = step
        .send(
            Dialect::Native,
            &staking_request(params, sender, payload, None),
        )
        .await;
    step.staking_pause().await;
    record
}

/// Blocks until the epoch on `shard` moves past the current one.
pub(crate) async fn wait_next_epoch(step: &Step<'_>, shard: u32) -> Result<u64, ScenarioError> {
    let ctx = step.ctx();
    let settings = ctx.settings();
    let capture = RetryPolicy::new(EPOCH_CAPTURE_ATTEMPTS, settings.query_retry.interval);

    let baseline = capture_epoch(ctx.ledger(), shard, capture)
        .await
        .map_err(|unmet| ScenarioError::query(format!("epoch on shard {shard}"), unmet.error))?;
    info!(shard, baseline, ceiling = ?settings.epoch_ceiling, "waiting for next epoch");

    await_epoch_after(
        ctx.ledger(),
        shard,
        baseline,
        settings.epoch_interval,
        settings.epoch_ceiling,
    )
    .await
    .map_err(|unmet| ScenarioError::query(format!("next epoch on shard {shard}"), unmet.error))
}

/// Waits until `address` is a registered validator reflecting `changes`.
pub(crate) async fn await_validator(
    step: &Step<'_>,
    address: &str,
    changes: &ValidatorChanges,
) -> Result<Option<ValidatorInfo>, Unmet<Option<ValidatorInfo>>> {
    let ctx = step.ctx();
    await_condition(
        format!("validator {address} registered with requested fields"),
        ctx.settings().balance_retry,
        || ctx.ledger().validator(address),
        |info| info.as_ref().is_some_and(|info| info.reflects(changes)),
    )
    .await
}

/// Waits until the delegation from `delegator` to `validator` satisfies
/// `predicate`.
pub(crate) async fn await_delegation<P>(
    step: &Step<'_>,
    delegator: &str,
    validator: &str,
    predicate: P,
) -> Result<Option<Delegation>, Unmet<Option<Delegation>>>
where
    P: Fn(&Delegation) -> bool,
{
    let ctx = step.ctx();
    await_condition(
        format!("delegation from {delegator} to {validator}"),
        ctx.settings().balance_retry,
        || async {
            let delegations = ctx.ledger().delegations_by_delegator(delegator).await?;
            Ok::<_, DynError>(
                delegations
                    .into_iter()
                    .find(|delegation| delegation.validator == validator),
            )
        },
        |found| found.as_ref().is_some_and(&predicate),
    )
    .await
}

#[cfg(test)]
mod tests {
    use testing_framework_config::GasConfig;

    use super::*;

    #[test]
    fn fees_are_covered_per_transaction() {
        let gas = GasConfig {
            limit: 2,
            price: Amount::from_whole(1),
        };
        let role = RoleSpec::funded(VALIDATOR, 0, Amount::from_whole(10)).paying_fees(&gas, 3);
        let funding = role.funding.expect("funded");
        assert_eq!(funding.amount, Amount::from_whole(10));
        assert_eq!(funding.fees(), Some(Amount::from_whole(6)));

        let unfunded = RoleSpec::unfunded(VALIDATOR, 0).paying_fees(&gas, 3);
        assert!(unfunded.funding.is_none());
    }

    #[test]
    fn validator_role_covers_edits_and_teardown() {
        let params = StakingParams {
            reuse_existing_validator: true,
            ..StakingParams::default()
        };
        let role = validator_role(&params, 3);
        let funding = role.funding.expect("funded");

        assert!(role.reusable_validator);
        assert_eq!(funding.amount, params.create.amount);
        assert_eq!(funding.fee_txs, 5);
        assert_eq!(funding.fee, params.gas.max_fee());
    }

    #[test]
    fn fee_payers_hold_a_float_and_their_fees() {
        let params = StakingParams::default();
        let role = fee_payer_role(VALIDATOR, &params, 2);
        let funding = role.funding.expect("funded");

        assert!(!role.reusable_validator);
        assert!(!funding.amount.is_zero());
        assert_eq!(funding.fee_txs, 2);
    }

    #[test]
    fn refused_operations_halt_with_their_error() {
        let staged = Staged::<()>::unmet("validator created", "validator one1v already exists");
        let Staged::Halted(checks) = staged else {
            panic!("expected a halt");
        };
        assert!(!checks.all_held());
        assert_eq!(checks.items()[0].detail, "validator one1v already exists");
    }
}
