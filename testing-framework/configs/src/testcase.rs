use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    amount::Amount,
    config::{ConfigError, GasConfig},
    constants::DEFAULT_TX_TIMEOUT,
    network::Dialect,
};

/// One declarative test-case record as it appears in YAML.
#[derive(Clone, Debug, Deserialize)]
pub struct TestCaseSpec {
    pub name: String,
    pub scenario: String,
    #[serde(default = "enabled")]
    pub execute: bool,
    #[serde(default = "enabled")]
    pub expected: bool,
    #[serde(default)]
    pub parameters: serde_yaml::Value,
}

const fn enabled() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TestCaseFile {
    Many(Vec<TestCaseSpec>),
    One(TestCaseSpec),
}

#[derive(Debug, Error)]
pub enum ScenarioParseError {
    #[error("unrecognized scenario type `{path}`")]
    UnknownScenario { path: String },
    #[error("invalid parameters for `{path}`: {source}")]
    InvalidParameters {
        path: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid parameters for `{path}`: {reason}")]
    OutOfRange { path: &'static str, reason: String },
    #[error("`{path}` does not support the {dialect} rpc prefix")]
    UnsupportedDialect {
        path: &'static str,
        dialect: Dialect,
    },
}

/// Upper bound on receivers of one transfer scenario.
pub const MAX_RECEIVERS: u32 = 8;

/// Upper bound on senders of the multiple-senders scenario.
pub const MAX_SENDERS: u32 = 8;

/// Parameters shared by the transfer scenarios.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TransferParams {
    pub amount: Amount,
    pub from_shard: u32,
    pub to_shard: u32,
    pub receiver_count: u32,
    /// Only read by the multiple-senders scenario.
    pub sender_count: u32,
    pub rpc_prefix: Dialect,
    /// Optional hex payload attached to each transfer.
    pub data: Option<String>,
    pub nonce: Option<u64>,
    pub gas: GasConfig,
    pub timeout_secs: u64,
}

impl Default for TransferParams {
    fn default() -> Self {
        Self {
            amount: Amount::ZERO,
            from_shard: 0,
            to_shard: 0,
            receiver_count: 1,
            sender_count: 2,
            rpc_prefix: Dialect::Native,
            data: None,
            nonce: None,
            gas: GasConfig::default(),
            timeout_secs: DEFAULT_TX_TIMEOUT.as_secs(),
        }
    }
}

impl TransferParams {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn is_cross_shard(&self) -> bool {
        self.from_shard != self.to_shard
    }
}

/// Parameters shared by the staking scenarios.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StakingParams {
    pub from_shard: u32,
    pub rpc_prefix: Dialect,
    pub reuse_existing_validator: bool,
    pub nonce: Option<u64>,
    pub gas: GasConfig,
    pub timeout_secs: u64,
    pub create: CreateValidatorParams,
    pub edit: EditValidatorParams,
    pub delegation: DelegationParams,
}

impl Default for StakingParams {
    fn default() -> Self {
        Self {
            from_shard: 0,
            rpc_prefix: Dialect::Native,
            reuse_existing_validator: false,
            nonce: None,
            gas: GasConfig {
                limit: 5_000_000,
                ..GasConfig::default()
            },
            timeout_secs: DEFAULT_TX_TIMEOUT.as_secs(),
            create: CreateValidatorParams::default(),
            edit: EditValidatorParams::default(),
            delegation: DelegationParams::default(),
        }
    }
}

impl StakingParams {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidatorDescription {
    pub name: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommissionRates {
    pub rate: Amount,
    pub max_rate: Amount,
    pub max_change_rate: Amount,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            rate: "0.1".parse().unwrap_or(Amount::ZERO),
            max_rate: "0.9".parse().unwrap_or(Amount::ZERO),
            max_change_rate: "0.05".parse().unwrap_or(Amount::ZERO),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CreateValidatorParams {
    pub description: ValidatorDescription,
    pub commission: CommissionRates,
    pub min_self_delegation: Amount,
    pub max_total_delegation: Amount,
    /// Self-delegated stake sent with the create-validator transaction.
    pub amount: Amount,
    /// Hex BLS public keys registered with the validator. Left empty, the
    /// signer supplies its own.
    pub bls_keys: Vec<String>,
}

impl Default for CreateValidatorParams {
    fn default() -> Self {
        Self {
            description: ValidatorDescription {
                name: "harness validator".to_owned(),
                ..ValidatorDescription::default()
            },
            commission: CommissionRates::default(),
            min_self_delegation: Amount::from_whole(10_000),
            max_total_delegation: Amount::from_whole(100_000),
            amount: Amount::from_whole(10_000),
            bls_keys: Vec::new(),
        }
    }
}

/// Field changes applied by an edit-validator transaction. Unset fields are
/// left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidatorChanges {
    pub name: Option<String>,
    pub identity: Option<String>,
    pub website: Option<String>,
    pub security_contact: Option<String>,
    pub details: Option<String>,
    pub commission_rate: Option<Amount>,
    pub min_self_delegation: Option<Amount>,
    pub max_total_delegation: Option<Amount>,
}

impl ValidatorChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EditValidatorParams {
    pub changes: ValidatorChanges,
    /// Number of times the edit is attempted.
    pub repeat: u32,
}

impl Default for EditValidatorParams {
    fn default() -> Self {
        Self {
            changes: ValidatorChanges {
                details: Some("edited by regression harness".to_owned()),
                ..ValidatorChanges::default()
            },
            repeat: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DelegationParams {
    /// Funding for the delegator account.
    pub amount: Amount,
    /// First delegation placed before undelegating in redelegation scenarios.
    pub initial: Option<Amount>,
    pub delegate: Amount,
    pub undelegate: Amount,
}

impl Default for DelegationParams {
    fn default() -> Self {
        Self {
            amount: Amount::from_whole(1_000),
            initial: None,
            delegate: Amount::from_whole(100),
            undelegate: Amount::from_whole(100),
        }
    }
}

/// Closed set of scenarios the harness knows how to run, each with its typed
/// parameter record.
#[derive(Clone, Debug)]
pub enum ScenarioKind {
    Transfer(TransferParams),
    SameAccountTransfer(TransferParams),
    MultipleSenders(TransferParams),
    MultipleReceiversInvalidNonce(TransferParams),
    CreateValidator(StakingParams),
    CreateValidatorInvalidAddress(StakingParams),
    CreateValidatorAlreadyExists(StakingParams),
    CreateValidatorExistingBlsKey(StakingParams),
    EditValidator(StakingParams),
    EditValidatorInvalidAddress(StakingParams),
    EditValidatorNonExisting(StakingParams),
    Delegate(StakingParams),
    DelegateInvalidAddress(StakingParams),
    DelegateNonExisting(StakingParams),
    Undelegate(StakingParams),
    UndelegateInvalidAddress(StakingParams),
    UndelegateNonExisting(StakingParams),
    Redelegate(StakingParams),
    RedelegateNextEpoch(StakingParams),
}

impl ScenarioKind {
    pub const PATHS: [&'static str; 19] = [
        "transactions/standard",
        "transactions/same_account",
        "transactions/multiple_senders",
        "transactions/multiple_receivers_invalid_nonce",
        "staking/validator/create/standard",
        "staking/validator/create/invalid_address",
        "staking/validator/create/already_exists",
        "staking/validator/create/existing_bls_key",
        "staking/validator/edit/standard",
        "staking/validator/edit/invalid_address",
        "staking/validator/edit/non_existing",
        "staking/delegation/delegate/standard",
        "staking/delegation/delegate/invalid_address",
        "staking/delegation/delegate/non_existing",
        "staking/delegation/undelegate/standard",
        "staking/delegation/undelegate/invalid_address",
        "staking/delegation/undelegate/non_existing",
        "staking/delegation/redelegate/standard",
        "staking/delegation/redelegate/locked_tokens",
    ];

    /// Maps a dot- or slash-delimited scenario path and its raw parameters to
    /// a typed variant.
    pub fn parse(path: &str, parameters: &serde_yaml::Value) -> Result<Self, ScenarioParseError> {
        let normalized = path.trim().to_ascii_lowercase().replace('.', "/");
        let Some(known) = Self::PATHS.iter().copied().find(|p| *p == normalized) else {
            return Err(ScenarioParseError::UnknownScenario {
                path: path.to_owned(),
            });
        };

        let kind = match known {
            "transactions/standard" => Self::Transfer(decode(known, parameters)?),
            "transactions/same_account" => Self::SameAccountTransfer(decode(known, parameters)?),
            "transactions/multiple_senders" => Self::MultipleSenders(decode(known, parameters)?),
            "transactions/multiple_receivers_invalid_nonce" => {
                Self::MultipleReceiversInvalidNonce(decode(known, parameters)?)
            }
            "staking/validator/create/standard" => Self::CreateValidator(decode(known, parameters)?),
            "staking/validator/create/invalid_address" => {
                Self::CreateValidatorInvalidAddress(decode(known, parameters)?)
            }
            "staking/validator/create/already_exists" => {
                Self::CreateValidatorAlreadyExists(decode(known, parameters)?)
            }
            "staking/validator/create/existing_bls_key" => {
                Self::CreateValidatorExistingBlsKey(decode(known, parameters)?)
            }
            "staking/validator/edit/standard" => Self::EditValidator(decode(known, parameters)?),
            "staking/validator/edit/invalid_address" => {
                Self::EditValidatorInvalidAddress(decode(known, parameters)?)
            }
            "staking/validator/edit/non_existing" => {
                Self::EditValidatorNonExisting(decode(known, parameters)?)
            }
            "staking/delegation/delegate/standard" => Self::Delegate(decode(known, parameters)?),
            "staking/delegation/delegate/invalid_address" => {
                Self::DelegateInvalidAddress(decode(known, parameters)?)
            }
            "staking/delegation/delegate/non_existing" => {
                Self::DelegateNonExisting(decode(known, parameters)?)
            }
            "staking/delegation/undelegate/standard" => Self::Undelegate(decode(known, parameters)?),
            "staking/delegation/undelegate/invalid_address" => {
                Self::UndelegateInvalidAddress(decode(known, parameters)?)
            }
            "staking/delegation/undelegate/non_existing" => {
                Self::UndelegateNonExisting(decode(known, parameters)?)
            }
            "staking/delegation/redelegate/standard" => Self::Redelegate(decode(known, parameters)?),
            _ => Self::RedelegateNextEpoch(decode(known, parameters)?),
        };

        let out_of_range = |reason: String| ScenarioParseError::OutOfRange {
            path: known,
            reason,
        };
        if let Some(p) = kind.transfer_params() {
            if p.amount.is_zero() {
                return Err(out_of_range("amount must be greater than zero".to_owned()));
            }
            if !(1..=MAX_RECEIVERS).contains(&p.receiver_count) {
                return Err(out_of_range(format!(
                    "receiver_count must be between 1 and {MAX_RECEIVERS}, got {}",
                    p.receiver_count
                )));
            }
        }
        if let Self::MultipleSenders(p) = &kind
            && !(1..=MAX_SENDERS).contains(&p.sender_count)
        {
            return Err(out_of_range(format!(
                "sender_count must be between 1 and {MAX_SENDERS}, got {}",
                p.sender_count
            )));
        }

        if let Some(p) = kind.staking_params()
            && p.rpc_prefix != Dialect::Native
        {
            return Err(ScenarioParseError::UnsupportedDialect {
                path: known,
                dialect: p.rpc_prefix,
            });
        }

        Ok(kind)
    }

    #[must_use]
    pub const fn transfer_params(&self) -> Option<&TransferParams> {
        match self {
            Self::Transfer(p)
            | Self::SameAccountTransfer(p)
            | Self::MultipleSenders(p)
            | Self::MultipleReceiversInvalidNonce(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub const fn staking_params(&self) -> Option<&StakingParams> {
        match self {
            Self::CreateValidator(p)
            | Self::CreateValidatorInvalidAddress(p)
            | Self::CreateValidatorAlreadyExists(p)
            | Self::CreateValidatorExistingBlsKey(p)
            | Self::EditValidator(p)
            | Self::EditValidatorInvalidAddress(p)
            | Self::EditValidatorNonExisting(p)
            | Self::Delegate(p)
            | Self::DelegateInvalidAddress(p)
            | Self::DelegateNonExisting(p)
            | Self::Undelegate(p)
            | Self::UndelegateInvalidAddress(p)
            | Self::UndelegateNonExisting(p)
            | Self::Redelegate(p)
            | Self::RedelegateNextEpoch(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub const fn path(&self) -> &'static str {
        let index = match self {
            Self::Transfer(_) => 0,
            Self::SameAccountTransfer(_) => 1,
            Self::MultipleSenders(_) => 2,
            Self::MultipleReceiversInvalidNonce(_) => 3,
            Self::CreateValidator(_) => 4,
            Self::CreateValidatorInvalidAddress(_) => 5,
            Self::CreateValidatorAlreadyExists(_) => 6,
            Self::CreateValidatorExistingBlsKey(_) => 7,
            Self::EditValidator(_) => 8,
            Self::EditValidatorInvalidAddress(_) => 9,
            Self::EditValidatorNonExisting(_) => 10,
            Self::Delegate(_) => 11,
            Self::DelegateInvalidAddress(_) => 12,
            Self::DelegateNonExisting(_) => 13,
            Self::Undelegate(_) => 14,
            Self::UndelegateInvalidAddress(_) => 15,
            Self::UndelegateNonExisting(_) => 16,
            Self::Redelegate(_) => 17,
            Self::RedelegateNextEpoch(_) => 18,
        };
        Self::PATHS[index]
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

fn decode<T>(path: &'static str, parameters: &serde_yaml::Value) -> Result<T, ScenarioParseError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if parameters.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(parameters.clone())
        .map_err(|source| ScenarioParseError::InvalidParameters { path, source })
}

/// Loads every `*.yaml`/`*.yml` file under `dir`, sorted by path, preserving
/// declared order inside each file.
pub fn load_test_case_specs(dir: &Path) -> Result<Vec<TestCaseSpec>, ConfigError> {
    let mut files = Vec::new();
    collect_yaml_files(dir, &mut files)?;
    files.sort();

    let mut specs = Vec::new();
    for path in files {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            continue;
        }
        let parsed: TestCaseFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        match parsed {
            TestCaseFile::Many(many) => specs.extend(many),
            TestCaseFile::One(one) => specs.push(one),
        }
    }
    Ok(specs)
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}
