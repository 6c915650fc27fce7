use std::time::Duration;

/// Default RPC retry attempts for balance and state queries.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Default wait between RPC retry attempts.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Default time a submitted transaction may take to finalize.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(60);

/// Default gas limit for plain transfers.
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// Default gas price (100 gwei) in whole-token units.
pub const DEFAULT_GAS_PRICE: &str = "0.0000001";

/// Minimum funding account balance enforced on localnet.
pub const LOCALNET_MINIMUM_FUNDS: u64 = 10;

/// Default minimum balance the funding account must hold before a run.
pub const DEFAULT_MINIMUM_FUNDS: u64 = 100;

/// Default fee allowance added to every funded account.
pub const DEFAULT_FUNDING_MARGIN: &str = "1";

/// Default network when none is configured.
pub const DEFAULT_NETWORK: &str = "localnet";

/// Default directory holding declarative test cases.
pub const DEFAULT_TESTCASES_DIR: &str = "testcases";

/// Default export directory.
pub const DEFAULT_EXPORT_PATH: &str = "./export";

/// Default export format.
pub const DEFAULT_EXPORT_FORMAT: &str = "csv";
