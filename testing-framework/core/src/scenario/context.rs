use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use testing_framework_config::{Amount, ChainId, Config, Dialect, GasConfig, adjust_timeout};
use tracing::{info, warn};

use super::{DynError, LeaseSet, TeardownRecord, account_name};
use crate::{
    convergence::RetryPolicy,
    funding::{FundedAccount, FundingAccount, FundingError},
    ledger::{
        Account, KeyStore, LedgerClient, TransactionRecord, TxReceipt, TxRequest, TxSubmitter,
    },
    network::NetworkContext,
};

const KEPT_VALIDATOR_ROLE: &str = "KeptValidator";

/// Tunables shared by every scenario in a run.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub identifier: String,
    /// Budget for plain state reads.
    pub query_retry: RetryPolicy,
    /// Budget for balance convergence checks.
    pub balance_retry: RetryPolicy,
    pub epoch_interval: Duration,
    /// `None` waits for the next epoch without an upper bound.
    pub epoch_ceiling: Option<Duration>,
    pub staking_wait: Duration,
    pub funding_margin: Amount,
    pub minimum_funds: Amount,
    pub remove_empty: bool,
}

impl RunSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            identifier: config.framework.identifier.clone(),
            query_retry: RetryPolicy::from(&config.network.retry),
            balance_retry: RetryPolicy::from(&config.network.balance_retry),
            epoch_interval: config.network.epoch_wait.interval(),
            epoch_ceiling: config.network.epoch_wait.ceiling().map(adjust_timeout),
            staking_wait: config.network.staking_wait(),
            funding_margin: config.funding.safety_margin,
            minimum_funds: config.funding.minimum(),
            remove_empty: config.account.remove_empty,
        }
    }
}

/// Collaborators and shared state handed to every scenario.
pub struct RunContext {
    ledger: Arc<dyn LedgerClient>,
    submitter: Arc<dyn TxSubmitter>,
    keystore: Arc<dyn KeyStore>,
    network: NetworkContext,
    funding: FundingAccount,
    settings: RunSettings,
    kept_validator: RwLock<Option<KeptValidator>>,
}

/// Validator created by one scenario and reused by later ones.
#[derive(Clone, Debug)]
pub struct KeptValidator {
    pub account: Account,
    /// Gas used to disable it at the end of the run.
    pub gas: GasConfig,
}

impl RunContext {
    #[must_use]
    pub fn new(
        config: &Config,
        ledger: Arc<dyn LedgerClient>,
        submitter: Arc<dyn TxSubmitter>,
        keystore: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            ledger,
            submitter,
            keystore,
            network: NetworkContext::new(&config.network.name, config.network.rpc_prefix),
            funding: FundingAccount::from_config(&config.funding),
            settings: RunSettings::from_config(config),
            kept_validator: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &dyn LedgerClient {
        self.ledger.as_ref()
    }

    #[must_use]
    pub fn keystore(&self) -> &dyn KeyStore {
        self.keystore.as_ref()
    }

    #[must_use]
    pub const fn network(&self) -> &NetworkContext {
        &self.network
    }

    #[must_use]
    pub const fn funding(&self) -> &FundingAccount {
        &self.funding
    }

    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    #[must_use]
    pub fn account_name(&self, case: &str, role: &str) -> String {
        account_name(&self.settings.identifier, case, role)
    }

    /// Validator kept alive by an earlier scenario, if any.
    #[must_use]
    pub fn reused_validator(&self) -> Option<Account> {
        self.kept_validator
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|kept| kept.account.clone())
    }

    pub(crate) fn keep_validator(&self, kept: KeptValidator) {
        info!(account = %kept.account.name, address = %kept.account.address, "keeping validator for later scenarios");
        *self
            .kept_validator
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(kept);
    }

    /// Disables and sweeps the kept validator, if any. Called once the last
    /// scenario that could reuse it has finished.
    pub async fn release_kept_validator(&self) -> Option<TeardownRecord> {
        let kept = self
            .kept_validator
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let mut leases = LeaseSet::default();
        leases
            .acquire(KEPT_VALIDATOR_ROLE, kept.account)
            .mark_validator(kept.gas);
        leases.release_all(self).await.pop()
    }

    /// Checks the funding account holds the configured minimum.
    pub async fn preflight(&self) -> Result<Amount, FundingError> {
        self.funding
            .ensure_minimum(
                self.ledger(),
                self.settings.minimum_funds,
                self.settings.query_retry,
            )
            .await
    }

    /// Funds `account` on `shard` from the shared funding account.
    pub async fn fund(
        &self,
        account: &Account,
        shard: u32,
        amount: Amount,
    ) -> Result<FundedAccount, FundingError> {
        let chain = self.network.chain_id(Dialect::Native, shard);
        self.funding
            .fund(
                self.ledger(),
                self.submitter.as_ref(),
                chain,
                account,
                shard,
                amount,
                self.settings.balance_retry,
            )
            .await
    }

    /// Submits `request` with `dialect`, switching the network context when
    /// the active one differs. Always yields a record, successful or not.
    pub async fn send(&self, dialect: Dialect, request: &TxRequest) -> TransactionRecord {
        let chain = self.network.chain_id(dialect, request.from_shard);
        let active = self.network.current().await;

        let outcome = if active.dialect == dialect && active.chain_id == chain {
            self.dispatch(dialect, chain, request).await
        } else {
            self.network
                .with_context(dialect, chain, |active| async move {
                    self.dispatch(active.dialect, active.chain_id, request).await
                })
                .await
        };

        let record = TransactionRecord::from_outcome(request, outcome);
        if record.success {
            info!(
                kind = record.kind,
                sender = %record.sender,
                receiver = %record.receiver,
                shard = record.sender_shard,
                tx_hash = record.hash.as_deref().unwrap_or_default(),
                "transaction succeeded"
            );
        } else {
            warn!(
                kind = record.kind,
                sender = %record.sender,
                receiver = %record.receiver,
                shard = record.sender_shard,
                error = record.error.as_deref().unwrap_or("rejected"),
                "transaction failed"
            );
        }
        record
    }

    async fn dispatch(
        &self,
        dialect: Dialect,
        chain: ChainId,
        request: &TxRequest,
    ) -> Result<TxReceipt, DynError> {
        match dialect {
            Dialect::Native => self.submitter.submit_native(chain, request).await,
            Dialect::Eth if request.payload.is_staking() => Err(format!(
                "{} is not available over the eth rpc prefix",
                request.payload.kind()
            )
            .into()),
            Dialect::Eth => self.submitter.submit_eth(chain, request).await,
        }
    }
}
