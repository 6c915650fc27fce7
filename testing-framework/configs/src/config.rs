use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use testing_framework_env as tf_env;
use thiserror::Error;
use tracing::debug;

use crate::{
    amount::Amount,
    constants::{
        DEFAULT_EXPORT_FORMAT, DEFAULT_EXPORT_PATH, DEFAULT_FUNDING_MARGIN, DEFAULT_GAS_LIMIT,
        DEFAULT_GAS_PRICE, DEFAULT_MINIMUM_FUNDS, DEFAULT_NETWORK, DEFAULT_RETRY_ATTEMPTS,
        DEFAULT_RETRY_WAIT, DEFAULT_TESTCASES_DIR, DEFAULT_TX_TIMEOUT, LOCALNET_MINIMUM_FUNDS,
    },
    network::Dialect,
    timeouts,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{section}.retry.attempts must be greater than zero")]
    ZeroAttempts { section: &'static str },
    #[error("no RPC endpoint configured for shard {shard} on network `{network}`")]
    MissingEndpoint { network: String, shard: u32 },
    #[error("funding account address is empty")]
    MissingFundingAddress,
    #[error("funding.shards must list at least one shard")]
    NoFundingShards,
    #[error("{section}.gas.limit must be greater than zero")]
    ZeroGasLimit { section: &'static str },
}

/// Top-level harness configuration loaded from YAML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub framework: FrameworkConfig,
    pub network: NetworkConfig,
    pub account: AccountConfig,
    pub funding: FundingConfig,
    pub export: ExportConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Prefix used for every generated account name.
    pub identifier: String,
    pub verbose: bool,
    pub testcases: PathBuf,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            identifier: "harness".to_owned(),
            verbose: false,
            testcases: PathBuf::from(DEFAULT_TESTCASES_DIR),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub name: String,
    pub mode: String,
    /// RPC endpoint per shard.
    pub endpoints: BTreeMap<u32, String>,
    pub rpc_prefix: Dialect,
    pub timeout_secs: u64,
    pub gas: GasConfig,
    pub retry: RetryConfig,
    /// Retry budget for balance convergence checks.
    pub balance_retry: RetryConfig,
    /// Optional pause after staking transactions before balances are read.
    pub staking_wait_secs: u64,
    pub epoch_wait: EpochWaitConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NETWORK.to_owned(),
            mode: "api".to_owned(),
            endpoints: BTreeMap::new(),
            rpc_prefix: Dialect::Native,
            timeout_secs: DEFAULT_TX_TIMEOUT.as_secs(),
            gas: GasConfig::default(),
            retry: RetryConfig::default(),
            balance_retry: RetryConfig::default(),
            staking_wait_secs: 0,
            epoch_wait: EpochWaitConfig::default(),
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn staking_wait(&self) -> Duration {
        Duration::from_secs(self.staking_wait_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub limit: u64,
    pub price: Amount,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_GAS_LIMIT,
            price: DEFAULT_GAS_PRICE.parse().unwrap_or(Amount::ZERO),
        }
    }
}

impl GasConfig {
    /// Maximum fee a transaction with this gas setting can be charged.
    #[must_use]
    pub fn max_fee(&self) -> Amount {
        self.price
            .checked_mul(self.limit)
            .unwrap_or(Amount::from_base_units(u128::MAX))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            wait_secs: DEFAULT_RETRY_WAIT.as_secs(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochWaitConfig {
    pub interval_secs: u64,
    /// `None` (or `0`) polls until the epoch advances with no upper bound.
    pub ceiling_secs: Option<u64>,
}

impl Default for EpochWaitConfig {
    fn default() -> Self {
        Self {
            interval_secs: timeouts::epoch_poll_interval().as_secs(),
            ceiling_secs: timeouts::epoch_wait_ceiling().map(|d| d.as_secs()),
        }
    }
}

impl EpochWaitConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn ceiling(&self) -> Option<Duration> {
        self.ceiling_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub passphrase: String,
    /// Remove generated keys from the key store once swept.
    pub remove_empty: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            passphrase: String::new(),
            remove_empty: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    pub account: FundingAccountConfig,
    /// Unset falls back to the network's default minimum.
    pub minimum_funds: Option<Amount>,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    pub gas: GasConfig,
    /// Fee allowance added to every funded account.
    pub safety_margin: Amount,
    /// Shards the funding account holds balance on.
    pub shards: Vec<u32>,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            account: FundingAccountConfig::default(),
            minimum_funds: None,
            timeout_secs: DEFAULT_TX_TIMEOUT.as_secs(),
            retry: RetryConfig::default(),
            gas: GasConfig::default(),
            safety_margin: DEFAULT_FUNDING_MARGIN.parse().unwrap_or(Amount::ZERO),
            shards: vec![0],
        }
    }
}

impl FundingConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Balance the funding account must hold before a suite starts.
    #[must_use]
    pub fn minimum(&self) -> Amount {
        self.minimum_funds
            .unwrap_or(Amount::from_whole(DEFAULT_MINIMUM_FUNDS))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingAccountConfig {
    pub name: String,
    pub address: String,
}

impl Default for FundingAccountConfig {
    fn default() -> Self {
        Self {
            name: "funding".to_owned(),
            address: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub path: PathBuf,
    pub format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_EXPORT_PATH),
            format: DEFAULT_EXPORT_FORMAT.to_owned(),
        }
    }
}

impl Config {
    /// Loads the YAML file at `path`, applies environment overrides and
    /// network-specific defaults, then validates the result.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(parent) = path.parent()
            && config.framework.testcases.is_relative()
        {
            config.framework.testcases = parent.join(&config.framework.testcases);
        }

        config.apply_env_overrides();
        config.apply_network_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Overrides selected fields from `HARNESS_*` variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(network) = tf_env::harness_network() {
            debug!(network, "network overridden from environment");
            self.network.name = network;
        }
        if let Some(format) = tf_env::harness_export_format() {
            self.export.format = format;
        }
        if let Some(path) = tf_env::harness_export_path() {
            self.export.path = path;
        }
        if let Some(attempts) = tf_env::harness_retry_attempts() {
            self.network.retry.attempts = attempts;
            self.network.balance_retry.attempts = attempts;
        }
        if let Some(wait) = tf_env::harness_retry_wait_secs() {
            self.network.retry.wait_secs = wait;
            self.network.balance_retry.wait_secs = wait;
        }
        if let Some(ceiling) = tf_env::harness_epoch_wait_ceiling_secs() {
            self.network.epoch_wait.ceiling_secs = Some(ceiling);
        }
        if tf_env::harness_verbose() {
            self.framework.verbose = true;
        }
    }

    /// Localnet funding accounts are only required to hold a small float
    /// unless the file sets a minimum explicitly.
    pub fn apply_network_defaults(&mut self) {
        if self.network.name.eq_ignore_ascii_case("localnet")
            && self.funding.minimum_funds.is_none()
        {
            self.funding.minimum_funds = Some(Amount::from_whole(LOCALNET_MINIMUM_FUNDS));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (section, retry) in [
            ("network", &self.network.retry),
            ("network.balance", &self.network.balance_retry),
            ("funding", &self.funding.retry),
        ] {
            if retry.attempts == 0 {
                return Err(ConfigError::ZeroAttempts { section });
            }
        }
        for (section, gas) in [("network", &self.network.gas), ("funding", &self.funding.gas)] {
            if gas.limit == 0 {
                return Err(ConfigError::ZeroGasLimit { section });
            }
        }
        if self.funding.account.address.trim().is_empty() {
            return Err(ConfigError::MissingFundingAddress);
        }
        if self.funding.shards.is_empty() {
            return Err(ConfigError::NoFundingShards);
        }
        if self.network.mode == "api" {
            for shard in &self.funding.shards {
                let configured = self
                    .network
                    .endpoints
                    .get(shard)
                    .is_some_and(|url| !url.trim().is_empty());
                if !configured {
                    return Err(ConfigError::MissingEndpoint {
                        network: self.network.name.clone(),
                        shard: *shard,
                    });
                }
            }
        }
        Ok(())
    }
}
