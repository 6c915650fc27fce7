pub mod account;
pub mod plan;

pub use account::{FundedAccount, FundingAccount};
pub use plan::FundingPlan;
use testing_framework_config::Amount;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FundingError {
    #[error("funding amount must be greater than zero")]
    ZeroAmount,
    #[error("funding multiple must be greater than zero")]
    ZeroMultiple,
    #[error("funding {amount} x {multiple} overflows the supported amount range")]
    Overflow { amount: Amount, multiple: u32 },
    #[error(
        "funding account {address} holds {available} across shards {shards:?}, below the required minimum {minimum}"
    )]
    InsufficientFunds {
        address: String,
        shards: Vec<u32>,
        available: Amount,
        minimum: Amount,
    },
    #[error("balance of {address} overflows the supported amount range")]
    BalanceOverflow { address: String },
    #[error("failed to read balance of {address} on shard {shard}: {reason}")]
    BalanceUnavailable {
        address: String,
        shard: u32,
        reason: String,
    },
    #[error(
        "funding transfer of {amount} to {account} ({address}) on shard {shard} failed after {attempts} attempt(s): {reason}"
    )]
    Transfer {
        account: String,
        address: String,
        shard: u32,
        amount: Amount,
        attempts: u32,
        reason: String,
    },
    #[error("{account} ({address}) was not credited {amount} on shard {shard}: {reason}")]
    NotCredited {
        account: String,
        address: String,
        shard: u32,
        amount: Amount,
        reason: String,
    },
}
