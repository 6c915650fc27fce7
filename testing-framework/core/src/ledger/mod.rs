pub mod rpc;

use std::time::Duration;

use async_trait::async_trait;
pub use rpc::{RpcClient, RpcError, RpcSubmitter, SignedTx, TxSigner};
use serde::{Deserialize, Serialize};
use testing_framework_config::{
    Amount, ChainId, GasConfig,
    testcase::{CommissionRates, ValidatorChanges, ValidatorDescription},
};

use crate::scenario::DynError;

/// A named key holder with a shard affinity and its last observed balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub address: String,
    pub shard: u32,
    pub balance: Amount,
}

impl Account {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            shard: 0,
            balance: Amount::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorStatus {
    Active,
    Inactive,
    Banned,
}

/// Operation carried by a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxPayload {
    Transfer {
        receiver: String,
        to_shard: u32,
        amount: Amount,
        data: Option<String>,
    },
    CreateValidator {
        validator: String,
        description: ValidatorDescription,
        commission: CommissionRates,
        min_self_delegation: Amount,
        max_total_delegation: Amount,
        amount: Amount,
        bls_keys: Vec<String>,
    },
    EditValidator {
        validator: String,
        changes: ValidatorChanges,
        status: Option<ValidatorStatus>,
    },
    Delegate {
        delegator: String,
        validator: String,
        amount: Amount,
    },
    Undelegate {
        delegator: String,
        validator: String,
        amount: Amount,
    },
}

impl TxPayload {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::CreateValidator { .. } => "create_validator",
            Self::EditValidator { .. } => "edit_validator",
            Self::Delegate { .. } => "delegate",
            Self::Undelegate { .. } => "undelegate",
        }
    }

    #[must_use]
    pub const fn is_staking(&self) -> bool {
        !matches!(self, Self::Transfer { .. })
    }

    /// Amount moved by the operation, if any.
    #[must_use]
    pub const fn amount(&self) -> Option<Amount> {
        match self {
            Self::Transfer { amount, .. }
            | Self::CreateValidator { amount, .. }
            | Self::Delegate { amount, .. }
            | Self::Undelegate { amount, .. } => Some(*amount),
            Self::EditValidator { .. } => None,
        }
    }
}

/// Everything the submission collaborator needs to build, sign and send one
/// transaction.
#[derive(Clone, Debug)]
pub struct TxRequest {
    pub sender: String,
    pub from_shard: u32,
    pub payload: TxPayload,
    pub nonce: Option<u64>,
    pub gas: GasConfig,
    pub timeout: Duration,
}

impl TxRequest {
    /// Counterparty address recorded for audit.
    #[must_use]
    pub fn receiver(&self) -> &str {
        match &self.payload {
            TxPayload::Transfer { receiver, .. } => receiver,
            TxPayload::CreateValidator { validator, .. }
            | TxPayload::EditValidator { validator, .. }
            | TxPayload::Delegate { validator, .. }
            | TxPayload::Undelegate { validator, .. } => validator,
        }
    }

    #[must_use]
    pub const fn to_shard(&self) -> u32 {
        match &self.payload {
            TxPayload::Transfer { to_shard, .. } => *to_shard,
            _ => self.from_shard,
        }
    }
}

/// Finalized outcome of a submitted transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Audit record of one submission, kept whether or not it succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub kind: &'static str,
    pub sender: String,
    pub sender_shard: u32,
    pub receiver: String,
    pub receiver_shard: u32,
    pub amount: Option<Amount>,
    pub success: bool,
    pub hash: Option<String>,
    pub error: Option<String>,
}

impl TransactionRecord {
    #[must_use]
    pub fn from_outcome(request: &TxRequest, outcome: Result<TxReceipt, DynError>) -> Self {
        let (success, hash, error) = match outcome {
            Ok(receipt) => (receipt.success, receipt.hash, receipt.error),
            Err(err) => (false, None, Some(err.to_string())),
        };
        Self {
            kind: request.payload.kind(),
            sender: request.sender.clone(),
            sender_shard: request.from_shard,
            receiver: request.receiver().to_owned(),
            receiver_shard: request.to_shard(),
            amount: request.payload.amount(),
            success,
            hash,
            error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub address: String,
    pub description: ValidatorDescription,
    pub commission_rate: Amount,
    pub min_self_delegation: Amount,
    pub max_total_delegation: Amount,
    pub status: ValidatorStatus,
    pub total_delegation: Amount,
    /// Hex BLS public keys the validator signs with.
    pub bls_keys: Vec<String>,
}

impl ValidatorInfo {
    /// True when every field set in `changes` is visible on this validator.
    #[must_use]
    pub fn reflects(&self, changes: &ValidatorChanges) -> bool {
        let text = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
        let amount = |want: Option<Amount>, have: Amount| want.is_none_or(|w| w == have);

        text(&changes.name, &self.description.name)
            && text(&changes.identity, &self.description.identity)
            && text(&changes.website, &self.description.website)
            && text(&changes.security_contact, &self.description.security_contact)
            && text(&changes.details, &self.description.details)
            && amount(changes.commission_rate, self.commission_rate)
            && amount(changes.min_self_delegation, self.min_self_delegation)
            && amount(changes.max_total_delegation, self.max_total_delegation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Undelegation {
    pub amount: Amount,
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delegation {
    pub delegator: String,
    pub validator: String,
    pub amount: Amount,
    pub undelegations: Vec<Undelegation>,
}

/// Read-only view of ledger state.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `None` when the node reports no balance for the address.
    async fn balance(&self, address: &str, shard: u32) -> Result<Option<Amount>, DynError>;

    /// `None` when no validator is registered under `address`.
    async fn validator(&self, address: &str) -> Result<Option<ValidatorInfo>, DynError>;

    async fn delegations_by_delegator(&self, address: &str) -> Result<Vec<Delegation>, DynError>;

    async fn current_epoch(&self, shard: u32) -> Result<u64, DynError>;
}

/// Submits transactions, one entry point per wire dialect.
///
/// `Err` means the submission could not be performed at all; an on-chain
/// rejection is an `Ok` receipt with `success == false`.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    async fn submit_native(&self, chain: ChainId, request: &TxRequest)
    -> Result<TxReceipt, DynError>;

    async fn submit_eth(&self, chain: ChainId, request: &TxRequest) -> Result<TxReceipt, DynError>;
}

/// Creates and retires named keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn generate(&self, name: &str) -> Result<Account, DynError>;

    async fn remove(&self, name: &str) -> Result<(), DynError>;
}
