use async_trait::async_trait;
use testing_framework_config::{
    Amount, Dialect,
    testcase::{StakingParams, ValidatorChanges},
};
use testing_framework_core::{
    ledger::{Account, TxPayload},
    scenario::{Checks, RoleSpec, ScenarioError, ScenarioFlow, Step},
};
use tracing::{info, warn};

use super::{
    Addressing, SENDER, Target, VALIDATOR,
    staking::{
        Staged, await_validator, create_payload, ensure_validator, fee_payer_role,
        staking_request, validator_role,
    },
};

/// Registers a validator, either self-signed or submitted by another account.
pub struct CreateValidatorFlow {
    params: StakingParams,
    addressing: Addressing,
}

impl CreateValidatorFlow {
    #[must_use]
    pub const fn new(params: StakingParams, addressing: Addressing) -> Self {
        Self { params, addressing }
    }
}

pub struct CreateSnapshot {
    validator: Account,
    /// Account that paid for the creation and its balance beforehand. `None`
    /// when nothing was submitted.
    payer: Option<(Account, Amount)>,
    accepted: bool,
}

#[async_trait]
impl ScenarioFlow for CreateValidatorFlow {
    type Snapshot = CreateSnapshot;

    fn name(&self) -> &'static str {
        match self.addressing {
            Addressing::Standard => "create_validator",
            Addressing::Mismatched => "create_validator_invalid_address",
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        match self.addressing {
            Addressing::Standard => vec![validator_role(params, 0)],
            Addressing::Mismatched => vec![
                RoleSpec::unfunded(VALIDATOR, params.from_shard),
                RoleSpec::funded(SENDER, params.from_shard, params.create.amount)
                    .paying_fees(&params.gas, 2),
            ],
        }
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<CreateSnapshot, ScenarioError> {
        let params = &self.params;
        match self.addressing {
            Addressing::Standard => {
                let validator = step.account(VALIDATOR)?;
                let start = step.balance(&validator.address, params.from_shard).await?;
                let (validator, record) = ensure_validator(step, params, params.nonce).await?;
                let accepted = record.as_ref().is_none_or(|record| record.success);
                let payer = record.map(|_| (validator.clone(), start));
                Ok(CreateSnapshot {
                    validator,
                    payer,
                    accepted,
                })
            }
            Addressing::Mismatched => {
                let validator = step.account(VALIDATOR)?;
                let sender = step.account(SENDER)?;
                let start = step.balance(&sender.address, params.from_shard).await?;

                let request = staking_request(
                    params,
                    &sender,
                    create_payload(params, &validator.address, params.create.bls_keys.clone()),
                    params.nonce,
                );
                let record = step.send(Dialect::Native, &request).await;
                if record.success {
                    warn!(
                        sender = %sender.address,
                        validator = %validator.address,
                        "validator created by a foreign sender"
                    );
                    step.mark_validator(VALIDATOR, params.gas);
                }
                step.staking_pause().await;
                Ok(CreateSnapshot {
                    validator,
                    payer: Some((sender, start)),
                    accepted: record.success,
                })
            }
        }
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        snapshot: CreateSnapshot,
    ) -> Result<Checks, ScenarioError> {
        let params = &self.params;
        let mut checks = Checks::new();
        if !snapshot.accepted {
            checks.record("create validator accepted", false, "transaction was refused");
            return Ok(checks);
        }

        checks.condition(
            "validator registered",
            await_validator(step, &snapshot.validator.address, &ValidatorChanges::default())
                .await,
        );

        if let Some((payer, start)) = snapshot.payer {
            let ending = step.balance(&payer.address, params.from_shard).await?;
            let ceiling = start.saturating_sub(params.create.amount);
            let held = match self.addressing {
                Addressing::Standard => ending <= ceiling,
                Addressing::Mismatched => ending < ceiling,
            };
            checks.record(
                format!("{} paid the self delegation", payer.name),
                held,
                format!("started at {start}, observed {ending}, ceiling {ceiling}"),
            );
        }
        Ok(checks)
    }
}

/// Applies the configured field changes to the scenario's validator,
/// `repeat` times. The edits may be signed by a foreign sender or aimed at
/// an address that never registered.
pub struct EditValidatorFlow {
    params: StakingParams,
    addressing: Addressing,
    target: Target,
}

impl EditValidatorFlow {
    #[must_use]
    pub const fn new(params: StakingParams, addressing: Addressing, target: Target) -> Self {
        Self {
            params,
            addressing,
            target,
        }
    }

    fn repeat(&self) -> u32 {
        self.params.edit.repeat.max(1)
    }
}

#[async_trait]
impl ScenarioFlow for EditValidatorFlow {
    type Snapshot = Checks;

    fn name(&self) -> &'static str {
        match (self.addressing, self.target) {
            (Addressing::Mismatched, _) => "edit_validator_invalid_address",
            (Addressing::Standard, Target::Registered) => "edit_validator",
            (Addressing::Standard, Target::Unregistered) => "edit_validator_non_existing",
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let edits = u64::from(self.repeat());
        let mut roles = vec![match self.target {
            Target::Registered => validator_role(params, edits),
            Target::Unregistered => fee_payer_role(VALIDATOR, params, edits),
        }];
        if self.addressing == Addressing::Mismatched {
            roles.push(fee_payer_role(SENDER, params, edits));
        }
        roles
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<Checks, ScenarioError> {
        let params = &self.params;
        let changes = &params.edit.changes;
        let mut checks = Checks::new();

        let validator = match self.target {
            Target::Registered => {
                let (validator, record) = ensure_validator(step, params, params.nonce).await?;
                if record.is_some_and(|record| !record.success) {
                    checks.record("validator created", false, "create validator was refused");
                    return Ok(checks);
                }
                validator
            }
            Target::Unregistered => step.account(VALIDATOR)?,
        };
        let signer = match self.addressing {
            Addressing::Standard => validator.clone(),
            Addressing::Mismatched => step.account(SENDER)?,
        };

        for attempt in 1..=self.repeat() {
            info!(
                validator = %validator.address,
                signer = %signer.address,
                attempt,
                "editing validator"
            );
            let payload = TxPayload::EditValidator {
                validator: validator.address.clone(),
                changes: changes.clone(),
                status: None,
            };
            let record = step
                .send(
                    Dialect::Native,
                    &staking_request(params, &signer, payload, None),
                )
                .await;
            step.staking_pause().await;
            if !record.success {
                checks.record(
                    format!("edit {attempt} accepted"),
                    false,
                    record.error.unwrap_or_default(),
                );
                break;
            }
            // An unregistered address has nothing to observe.
            if self.target == Target::Unregistered {
                continue;
            }

            let observed = checks.condition(
                format!("edit {attempt} observed"),
                await_validator(step, &validator.address, changes).await,
            );
            if observed.is_none() {
                break;
            }
        }
        Ok(checks)
    }

    async fn verify(&self, _step: &mut Step<'_>, checks: Checks) -> Result<Checks, ScenarioError> {
        Ok(checks)
    }
}

/// What a second validator registration reuses from the first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplicate {
    /// The same validator address is registered twice.
    Address,
    /// A fresh address claims the BLS keys of the existing validator.
    BlsKeys,
}

/// Registers a validator, then attempts a second registration that collides
/// with it. The ledger is expected to refuse the second one.
pub struct DuplicateValidatorFlow {
    params: StakingParams,
    duplicate: Duplicate,
}

impl DuplicateValidatorFlow {
    #[must_use]
    pub const fn new(params: StakingParams, duplicate: Duplicate) -> Self {
        Self { params, duplicate }
    }
}

#[async_trait]
impl ScenarioFlow for DuplicateValidatorFlow {
    type Snapshot = Staged<String>;

    fn name(&self) -> &'static str {
        match self.duplicate {
            Duplicate::Address => "create_validator_already_exists",
            Duplicate::BlsKeys => "create_validator_existing_bls_key",
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        match self.duplicate {
            Duplicate::Address => vec![validator_role(params, 1).with_multiple(2)],
            Duplicate::BlsKeys => vec![
                validator_role(params, 0),
                RoleSpec::funded(SENDER, params.from_shard, params.create.amount)
                    .paying_fees(&params.gas, 2),
            ],
        }
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<Staged<String>, ScenarioError> {
        let params = &self.params;
        let (existing, record) = ensure_validator(step, params, params.nonce).await?;
        if let Some(record) = record.filter(|record| !record.success) {
            return Ok(Staged::halted("first validator created", &record));
        }

        let (candidate, bls_keys) = match self.duplicate {
            Duplicate::Address => (existing, params.create.bls_keys.clone()),
            Duplicate::BlsKeys => {
                let found =
                    await_validator(step, &existing.address, &ValidatorChanges::default()).await;
                let keys = match found {
                    Ok(Some(info)) if !info.bls_keys.is_empty() => info.bls_keys,
                    Ok(_) => {
                        return Ok(Staged::unmet(
                            "existing validator keys readable",
                            format!("{} lists no BLS keys", existing.address),
                        ));
                    }
                    Err(unmet) => {
                        return Ok(Staged::unmet(
                            "existing validator keys readable",
                            unmet.to_string(),
                        ));
                    }
                };
                (step.account(SENDER)?, keys)
            }
        };

        info!(
            validator = %candidate.address,
            keys = bls_keys.len(),
            "registering a colliding validator"
        );
        let request = staking_request(
            params,
            &candidate,
            create_payload(params, &candidate.address, bls_keys),
            None,
        );
        let record = step.send(Dialect::Native, &request).await;
        step.staking_pause().await;
        if !record.success {
            return Ok(Staged::halted("duplicate validator accepted", &record));
        }
        warn!(validator = %candidate.address, "colliding validator registration accepted");
        if self.duplicate == Duplicate::BlsKeys {
            step.mark_validator(SENDER, params.gas);
        }
        Ok(Staged::Ready(candidate.address))
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        staged: Staged<String>,
    ) -> Result<Checks, ScenarioError> {
        let address = match staged {
            Staged::Ready(address) => address,
            Staged::Halted(checks) => return Ok(checks),
        };
        let mut checks = Checks::new();
        checks.condition(
            "duplicate validator registered",
            await_validator(step, &address, &ValidatorChanges::default()).await,
        );
        Ok(checks)
    }
}
