//! Deterministic in-memory ledger for exercising scenarios without a network.
//!
//! Implements every collaborator the harness consumes: state queries,
//! submission in both wire dialects and key management. Fees, shards, epochs,
//! validators and the undelegation lock follow the live network's rules
//! closely enough for end-to-end suite runs.

mod state;

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use state::LedgerState;
pub use state::{BEACON_SHARD, SimError};
use testing_framework_config::{Amount, ChainId, Dialect};
use testing_framework_core::{
    DynError,
    ledger::{
        Account, Delegation, KeyStore, LedgerClient, TxReceipt, TxRequest, TxSubmitter,
        ValidatorInfo,
    },
};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub shards: u32,
    /// Epoch queries after which the epoch advances. Zero freezes the epoch
    /// unless advanced explicitly.
    pub queries_per_epoch: u64,
    pub undelegation_lock_epochs: u64,
    pub address_prefix: String,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queries_per_epoch: 3,
            undelegation_lock_epochs: 7,
            address_prefix: "one1".to_owned(),
            seed: 0x5eed,
        }
    }
}

/// One submission seen by the simulated ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub dialect: Dialect,
    pub chain: ChainId,
    pub kind: &'static str,
    pub sender: String,
    pub from_shard: u32,
    pub hash: String,
    pub error: Option<String>,
}

impl Submission {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
struct Faults {
    failed_submissions: u32,
    failed_queries: u32,
    rejected_kinds: BTreeSet<&'static str>,
    rejected_senders: BTreeSet<String>,
}

struct Inner {
    state: LedgerState,
    faults: Faults,
    submissions: VecDeque<Submission>,
}

pub struct SimLedger {
    config: SimConfig,
    inner: Mutex<Inner>,
}

impl SimLedger {
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let state = LedgerState::new(config.seed);
        Self {
            config,
            inner: Mutex::new(Inner {
                state,
                faults: Faults::default(),
                submissions: VecDeque::new(),
            }),
        }
    }

    /// Seeds `address` with `amount` on `shard`.
    #[must_use]
    pub fn with_funds(self, address: &str, shard: u32, amount: Amount) -> Self {
        self.credit(address, shard, amount);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn credit(&self, address: &str, shard: u32, amount: Amount) {
        if let Err(err) = self.lock().state.credit(address, shard, amount) {
            debug!(address, shard, %amount, %err, "credit ignored");
        }
    }

    #[must_use]
    pub fn balance_of(&self, address: &str, shard: u32) -> Amount {
        self.lock()
            .state
            .balance(address, shard)
            .unwrap_or(Amount::ZERO)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().state.epoch()
    }

    /// Moves to the next epoch, releasing expired undelegations.
    pub fn advance_epoch(&self) -> u64 {
        self.lock().state.advance_epoch(&self.config)
    }

    /// Names of keys currently held by the key store.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().state.keys()
    }

    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.iter().cloned().collect()
    }

    /// Makes the next `count` submissions fail before reaching the ledger.
    pub fn fail_submissions(&self, count: u32) {
        self.lock().faults.failed_submissions = count;
    }

    /// Makes the next `count` state queries fail.
    pub fn fail_queries(&self, count: u32) {
        self.lock().faults.failed_queries = count;
    }

    /// Rejects every transaction of `kind` on chain.
    pub fn reject_kind(&self, kind: &'static str) {
        self.lock().faults.rejected_kinds.insert(kind);
    }

    /// Rejects every transaction sent by `address` on chain.
    pub fn reject_sender(&self, address: &str) {
        self.lock().faults.rejected_senders.insert(address.to_owned());
    }

    fn query<T>(&self, read: impl FnOnce(&mut Inner) -> T) -> Result<T, DynError> {
        let mut inner = self.lock();
        if inner.faults.failed_queries > 0 {
            inner.faults.failed_queries -= 1;
            return Err("simulated node unavailable".into());
        }
        Ok(read(&mut inner))
    }

    fn submit(
        &self,
        dialect: Dialect,
        chain: ChainId,
        request: &TxRequest,
    ) -> Result<TxReceipt, DynError> {
        let mut inner = self.lock();
        if inner.faults.failed_submissions > 0 {
            inner.faults.failed_submissions -= 1;
            return Err("simulated connection refused".into());
        }

        let kind = request.payload.kind();
        let outcome = if dialect == Dialect::Eth && request.payload.is_staking() {
            Err(SimError::StakingOverEth)
        } else if inner.faults.rejected_kinds.contains(kind)
            || inner.faults.rejected_senders.contains(&request.sender)
        {
            Err(SimError::Injected {
                reason: format!("{kind} rejected by simulated ledger"),
            })
        } else {
            inner.state.apply(&self.config, request)
        };

        let hash = format!("0x{}", inner.state.random_hex(32));
        let error = outcome.err().map(|err| err.to_string());
        debug!(
            kind,
            sender = %request.sender,
            shard = request.from_shard,
            %chain,
            tx_hash = %hash,
            error = error.as_deref().unwrap_or_default(),
            "simulated submission"
        );
        inner.submissions.push_back(Submission {
            dialect,
            chain,
            kind,
            sender: request.sender.clone(),
            from_shard: request.from_shard,
            hash: hash.clone(),
            error: error.clone(),
        });

        Ok(TxReceipt {
            hash: Some(hash),
            success: error.is_none(),
            error,
        })
    }
}

impl Default for SimLedger {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait]
impl LedgerClient for SimLedger {
    async fn balance(&self, address: &str, shard: u32) -> Result<Option<Amount>, DynError> {
        self.query(|inner| inner.state.balance(address, shard))
    }

    async fn validator(&self, address: &str) -> Result<Option<ValidatorInfo>, DynError> {
        self.query(|inner| inner.state.validator(address))
    }

    async fn delegations_by_delegator(&self, address: &str) -> Result<Vec<Delegation>, DynError> {
        self.query(|inner| inner.state.delegations_by_delegator(address))
    }

    async fn current_epoch(&self, shard: u32) -> Result<u64, DynError> {
        if shard >= self.config.shards {
            return Err(SimError::UnknownShard { shard }.into());
        }
        self.query(|inner| inner.state.observe_epoch(&self.config))
    }
}

#[async_trait]
impl TxSubmitter for SimLedger {
    async fn submit_native(
        &self,
        chain: ChainId,
        request: &TxRequest,
    ) -> Result<TxReceipt, DynError> {
        self.submit(Dialect::Native, chain, request)
    }

    async fn submit_eth(&self, chain: ChainId, request: &TxRequest) -> Result<TxReceipt, DynError> {
        self.submit(Dialect::Eth, chain, request)
    }
}

#[async_trait]
impl KeyStore for SimLedger {
    async fn generate(&self, name: &str) -> Result<Account, DynError> {
        let address = self
            .lock()
            .state
            .add_key(name, &self.config.address_prefix)?;
        Ok(Account::new(name, address))
    }

    async fn remove(&self, name: &str) -> Result<(), DynError> {
        Ok(self.lock().state.remove_key(name)?)
    }
}
