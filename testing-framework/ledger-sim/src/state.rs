use std::collections::{BTreeMap, HashMap};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use testing_framework_config::{Amount, testcase::ValidatorChanges};
use testing_framework_core::ledger::{
    Delegation, TxPayload, TxRequest, Undelegation, ValidatorInfo, ValidatorStatus,
};
use thiserror::Error;

use crate::SimConfig;

/// Shard holding validator and delegation state.
pub const BEACON_SHARD: u32 = 0;

/// Length of a generated BLS public key.
const BLS_KEY_BYTES: usize = 48;

/// Reasons the simulated ledger rejects a transaction or key operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("shard {shard} does not exist")]
    UnknownShard { shard: u32 },
    #[error("staking transactions must be sent on shard {BEACON_SHARD}, got shard {shard}")]
    NotBeaconShard { shard: u32 },
    #[error("staking transactions are not accepted over eth")]
    StakingOverEth,
    #[error("insufficient funds for {address} on shard {shard}: need {needed}, have {available}")]
    InsufficientFunds {
        address: String,
        shard: u32,
        needed: Amount,
        available: Amount,
    },
    #[error("nonce mismatch for {address} on shard {shard}: expected {expected}, got {got}")]
    Nonce {
        address: String,
        shard: u32,
        expected: u64,
        got: u64,
    },
    #[error("sender {sender} cannot act as {role} {address}")]
    SenderMismatch {
        sender: String,
        role: &'static str,
        address: String,
    },
    #[error("validator {address} already exists")]
    ValidatorExists { address: String },
    #[error("validator {address} does not exist")]
    UnknownValidator { address: String },
    #[error("bls key {key} is already used by validator {owner}")]
    BlsKeyInUse { key: String, owner: String },
    #[error("validator {address} is banned")]
    Banned { address: String },
    #[error("self delegation {amount} below minimum {minimum}")]
    BelowMinSelfDelegation { amount: Amount, minimum: Amount },
    #[error("total delegation {total} exceeds maximum {maximum} for validator {address}")]
    ExceedsMaxTotalDelegation {
        address: String,
        total: Amount,
        maximum: Amount,
    },
    #[error("commission rate {rate} exceeds max rate {max_rate}")]
    CommissionTooHigh { rate: Amount, max_rate: Amount },
    #[error("no delegation from {delegator} to {validator}")]
    NoDelegation { delegator: String, validator: String },
    #[error("cannot undelegate {requested} from {validator}, only {available} delegated")]
    InsufficientDelegation {
        validator: String,
        requested: Amount,
        available: Amount,
    },
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("amount overflow")]
    Overflow,
    #[error("key `{name}` already exists")]
    KeyExists { name: String },
    #[error("key `{name}` does not exist")]
    UnknownKey { name: String },
    #[error("{reason}")]
    Injected { reason: String },
}

/// Whole simulated chain state, guarded by the ledger's lock.
pub(crate) struct LedgerState {
    balances: HashMap<(String, u32), Amount>,
    nonces: HashMap<(String, u32), u64>,
    validators: BTreeMap<String, ValidatorInfo>,
    delegations: BTreeMap<(String, String), Delegation>,
    keys: BTreeMap<String, String>,
    epoch: u64,
    epoch_queries: u64,
    rng: StdRng,
}

impl LedgerState {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            balances: HashMap::new(),
            nonces: HashMap::new(),
            validators: BTreeMap::new(),
            delegations: BTreeMap::new(),
            keys: BTreeMap::new(),
            epoch: 1,
            epoch_queries: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn balance(&self, address: &str, shard: u32) -> Option<Amount> {
        self.balances.get(&(address.to_owned(), shard)).copied()
    }

    pub(crate) fn credit(&mut self, address: &str, shard: u32, amount: Amount) -> Result<(), SimError> {
        let entry = self
            .balances
            .entry((address.to_owned(), shard))
            .or_insert(Amount::ZERO);
        *entry = entry.checked_add(amount).ok_or(SimError::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, address: &str, shard: u32, amount: Amount) -> Result<(), SimError> {
        let available = self.balance(address, shard).unwrap_or(Amount::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or_else(|| SimError::InsufficientFunds {
                address: address.to_owned(),
                shard,
                needed: amount,
                available,
            })?;
        self.balances.insert((address.to_owned(), shard), remaining);
        Ok(())
    }

    fn require_funds(&self, address: &str, shard: u32, needed: Amount) -> Result<(), SimError> {
        let available = self.balance(address, shard).unwrap_or(Amount::ZERO);
        if available < needed {
            return Err(SimError::InsufficientFunds {
                address: address.to_owned(),
                shard,
                needed,
                available,
            });
        }
        Ok(())
    }

    pub(crate) fn validator(&self, address: &str) -> Option<ValidatorInfo> {
        self.validators.get(address).cloned()
    }

    pub(crate) fn delegations_by_delegator(&self, address: &str) -> Vec<Delegation> {
        self.delegations
            .iter()
            .filter(|((delegator, _), _)| delegator == address)
            .map(|(_, delegation)| delegation.clone())
            .collect()
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Counts an epoch query, advancing the epoch every `per_epoch` queries.
    pub(crate) fn observe_epoch(&mut self, config: &SimConfig) -> u64 {
        if config.queries_per_epoch > 0 {
            self.epoch_queries += 1;
            if self.epoch_queries >= config.queries_per_epoch {
                self.epoch_queries = 0;
                self.advance_epoch(config);
            }
        }
        self.epoch
    }

    /// Moves to the next epoch and releases undelegations whose lock expired.
    pub(crate) fn advance_epoch(&mut self, config: &SimConfig) -> u64 {
        self.epoch += 1;
        let epoch = self.epoch;

        let mut released = Vec::new();
        for ((delegator, _), delegation) in &mut self.delegations {
            delegation.undelegations.retain(|pending| {
                let unlocked = pending.epoch + config.undelegation_lock_epochs <= epoch;
                if unlocked {
                    released.push((delegator.clone(), pending.amount));
                }
                !unlocked
            });
        }
        for (delegator, amount) in released {
            // Balances stay far below u128::MAX in a simulation.
            let _ = self.credit(&delegator, BEACON_SHARD, amount);
        }
        self.prune_delegations();
        epoch
    }

    fn prune_delegations(&mut self) {
        self.delegations
            .retain(|_, delegation| !delegation.amount.is_zero() || !delegation.undelegations.is_empty());
    }

    pub(crate) fn random_hex(&mut self, bytes: usize) -> String {
        let raw: Vec<u8> = (0..bytes).map(|_| self.rng.r#gen::<u8>()).collect();
        hex::encode(raw)
    }

    pub(crate) fn add_key(&mut self, name: &str, prefix: &str) -> Result<String, SimError> {
        if self.keys.contains_key(name) {
            return Err(SimError::KeyExists {
                name: name.to_owned(),
            });
        }
        let address = format!("{prefix}{}", self.random_hex(20));
        self.keys.insert(name.to_owned(), address.clone());
        Ok(address)
    }

    pub(crate) fn remove_key(&mut self, name: &str) -> Result<(), SimError> {
        self.keys
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SimError::UnknownKey {
                name: name.to_owned(),
            })
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    /// Validates and applies `request` atomically: on `Err` nothing changed.
    pub(crate) fn apply(&mut self, config: &SimConfig, request: &TxRequest) -> Result<(), SimError> {
        let sender = request.sender.as_str();
        let shard = request.from_shard;
        let fee = request.gas.max_fee();
        self.require_shard(config, shard)?;
        if request.payload.is_staking() && shard != BEACON_SHARD {
            return Err(SimError::NotBeaconShard { shard });
        }
        let nonce_key = (sender.to_owned(), shard);
        let expected_nonce = self.nonces.get(&nonce_key).copied().unwrap_or_default();
        if let Some(got) = request.nonce
            && got != expected_nonce
        {
            return Err(SimError::Nonce {
                address: sender.to_owned(),
                shard,
                expected: expected_nonce,
                got,
            });
        }

        match &request.payload {
            TxPayload::Transfer {
                receiver,
                to_shard,
                amount,
                ..
            } => {
                self.require_shard(config, *to_shard)?;
                let total = amount.checked_add(fee).ok_or(SimError::Overflow)?;
                self.require_funds(sender, shard, total)?;
                self.debit(sender, shard, total)?;
                self.credit(receiver, *to_shard, *amount)?;
            }
            TxPayload::CreateValidator {
                validator,
                description,
                commission,
                min_self_delegation,
                max_total_delegation,
                amount,
                bls_keys,
            } => {
                require_sender(sender, "validator", validator)?;
                if self.validators.contains_key(validator) {
                    return Err(SimError::ValidatorExists {
                        address: validator.clone(),
                    });
                }
                if let Some((key, owner)) = self.bls_key_owner(bls_keys) {
                    return Err(SimError::BlsKeyInUse { key, owner });
                }
                if commission.rate > commission.max_rate {
                    return Err(SimError::CommissionTooHigh {
                        rate: commission.rate,
                        max_rate: commission.max_rate,
                    });
                }
                if amount < min_self_delegation {
                    return Err(SimError::BelowMinSelfDelegation {
                        amount: *amount,
                        minimum: *min_self_delegation,
                    });
                }
                if amount > max_total_delegation {
                    return Err(SimError::ExceedsMaxTotalDelegation {
                        address: validator.clone(),
                        total: *amount,
                        maximum: *max_total_delegation,
                    });
                }
                let total = amount.checked_add(fee).ok_or(SimError::Overflow)?;
                self.require_funds(sender, shard, total)?;
                self.debit(sender, shard, total)?;

                let bls_keys = if bls_keys.is_empty() {
                    vec![self.random_hex(BLS_KEY_BYTES)]
                } else {
                    bls_keys.clone()
                };
                self.validators.insert(
                    validator.clone(),
                    ValidatorInfo {
                        address: validator.clone(),
                        description: description.clone(),
                        commission_rate: commission.rate,
                        min_self_delegation: *min_self_delegation,
                        max_total_delegation: *max_total_delegation,
                        status: ValidatorStatus::Active,
                        total_delegation: *amount,
                        bls_keys,
                    },
                );
                self.delegations.insert(
                    (validator.clone(), validator.clone()),
                    Delegation {
                        delegator: validator.clone(),
                        validator: validator.clone(),
                        amount: *amount,
                        undelegations: Vec::new(),
                    },
                );
            }
            TxPayload::EditValidator {
                validator,
                changes,
                status,
            } => {
                require_sender(sender, "validator", validator)?;
                let current = self.existing_validator(validator)?;
                let edited = edited(current, changes, *status)?;
                self.require_funds(sender, shard, fee)?;
                self.debit(sender, shard, fee)?;
                self.validators.insert(validator.clone(), edited);
            }
            TxPayload::Delegate {
                delegator,
                validator,
                amount,
            } => {
                require_sender(sender, "delegator", delegator)?;
                if amount.is_zero() {
                    return Err(SimError::ZeroAmount);
                }
                let info = self.existing_validator(validator)?;
                if info.status == ValidatorStatus::Banned {
                    return Err(SimError::Banned {
                        address: validator.clone(),
                    });
                }
                let total = info
                    .total_delegation
                    .checked_add(*amount)
                    .ok_or(SimError::Overflow)?;
                if total > info.max_total_delegation {
                    return Err(SimError::ExceedsMaxTotalDelegation {
                        address: validator.clone(),
                        total,
                        maximum: info.max_total_delegation,
                    });
                }

                let key = (delegator.clone(), validator.clone());
                let locked = self
                    .delegations
                    .get(&key)
                    .map(|d| d.undelegations.iter().map(|u| u.amount.base_units()).sum::<u128>())
                    .map_or(Amount::ZERO, Amount::from_base_units);
                let from_locked = locked.min(*amount);
                let from_balance = amount.saturating_sub(from_locked);
                let needed = from_balance.checked_add(fee).ok_or(SimError::Overflow)?;
                self.require_funds(sender, shard, needed)?;
                self.debit(sender, shard, needed)?;

                let delegation = self.delegations.entry(key).or_insert_with(|| Delegation {
                    delegator: delegator.clone(),
                    validator: validator.clone(),
                    amount: Amount::ZERO,
                    undelegations: Vec::new(),
                });
                consume_locked(&mut delegation.undelegations, from_locked);
                delegation.amount = delegation
                    .amount
                    .checked_add(*amount)
                    .ok_or(SimError::Overflow)?;
                if let Some(info) = self.validators.get_mut(validator) {
                    info.total_delegation = total;
                }
            }
            TxPayload::Undelegate {
                delegator,
                validator,
                amount,
            } => {
                require_sender(sender, "delegator", delegator)?;
                if amount.is_zero() {
                    return Err(SimError::ZeroAmount);
                }
                self.existing_validator(validator)?;
                let key = (delegator.clone(), validator.clone());
                let available = self
                    .delegations
                    .get(&key)
                    .map(|d| d.amount)
                    .ok_or_else(|| SimError::NoDelegation {
                        delegator: delegator.clone(),
                        validator: validator.clone(),
                    })?;
                let remaining =
                    available
                        .checked_sub(*amount)
                        .ok_or_else(|| SimError::InsufficientDelegation {
                            validator: validator.clone(),
                            requested: *amount,
                            available,
                        })?;
                self.require_funds(sender, shard, fee)?;
                self.debit(sender, shard, fee)?;

                let epoch = self.epoch;
                if let Some(delegation) = self.delegations.get_mut(&key) {
                    delegation.amount = remaining;
                    delegation.undelegations.push(Undelegation {
                        amount: *amount,
                        epoch,
                    });
                }
                if let Some(info) = self.validators.get_mut(validator) {
                    info.total_delegation = info.total_delegation.saturating_sub(*amount);
                }
            }
        }

        self.nonces.insert(nonce_key, expected_nonce + 1);
        Ok(())
    }

    fn require_shard(&self, config: &SimConfig, shard: u32) -> Result<(), SimError> {
        if shard >= config.shards {
            return Err(SimError::UnknownShard { shard });
        }
        Ok(())
    }

    /// First of `keys` already registered, with the validator holding it.
    fn bls_key_owner(&self, keys: &[String]) -> Option<(String, String)> {
        keys.iter().find_map(|key| {
            self.validators
                .values()
                .find(|info| info.bls_keys.iter().any(|held| held.eq_ignore_ascii_case(key)))
                .map(|info| (key.clone(), info.address.clone()))
        })
    }

    fn existing_validator(&self, address: &str) -> Result<ValidatorInfo, SimError> {
        self.validator(address)
            .ok_or_else(|| SimError::UnknownValidator {
                address: address.to_owned(),
            })
    }
}

fn require_sender(sender: &str, role: &'static str, address: &str) -> Result<(), SimError> {
    if sender != address {
        return Err(SimError::SenderMismatch {
            sender: sender.to_owned(),
            role,
            address: address.to_owned(),
        });
    }
    Ok(())
}

fn edited(
    mut info: ValidatorInfo,
    changes: &ValidatorChanges,
    status: Option<ValidatorStatus>,
) -> Result<ValidatorInfo, SimError> {
    let description = &mut info.description;
    for (field, change) in [
        (&mut description.name, &changes.name),
        (&mut description.identity, &changes.identity),
        (&mut description.website, &changes.website),
        (&mut description.security_contact, &changes.security_contact),
        (&mut description.details, &changes.details),
    ] {
        if let Some(value) = change {
            field.clone_from(value);
        }
    }
    if let Some(rate) = changes.commission_rate {
        info.commission_rate = rate;
    }
    if let Some(minimum) = changes.min_self_delegation {
        info.min_self_delegation = minimum;
    }
    if let Some(maximum) = changes.max_total_delegation {
        if maximum < info.total_delegation {
            return Err(SimError::ExceedsMaxTotalDelegation {
                address: info.address.clone(),
                total: info.total_delegation,
                maximum,
            });
        }
        info.max_total_delegation = maximum;
    }
    if let Some(status) = status {
        info.status = status;
    }
    Ok(info)
}

/// Takes `amount` out of pending undelegations, most recent first.
fn consume_locked(pending: &mut Vec<Undelegation>, mut amount: Amount) {
    while !amount.is_zero() {
        let Some(last) = pending.last_mut() else {
            return;
        };
        if last.amount > amount {
            last.amount = last.amount.saturating_sub(amount);
            return;
        }
        amount = amount.saturating_sub(last.amount);
        pending.pop();
    }
}
