use std::time::Duration;

use testing_framework_config::{Amount, ChainId, FundingConfig, GasConfig};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, info, warn};

use super::FundingError;
use crate::{
    convergence::{RetryPolicy, await_balance_at_least, query_balance},
    ledger::{Account, LedgerClient, TransactionRecord, TxPayload, TxRequest, TxSubmitter},
};

/// Outcome of a confirmed funding transfer.
#[derive(Clone, Debug)]
pub struct FundedAccount {
    pub record: TransactionRecord,
    /// Balance observed once the transfer was credited.
    pub balance: Amount,
}

/// Handle to the long-lived account every scenario draws funds from.
///
/// Withdrawals are serialized through an internal lock so nonces never race.
#[derive(Debug)]
pub struct FundingAccount {
    name: String,
    address: String,
    shards: Vec<u32>,
    gas: GasConfig,
    timeout: Duration,
    retry: RetryPolicy,
    withdrawals: Mutex<()>,
}

impl FundingAccount {
    #[must_use]
    pub fn from_config(config: &FundingConfig) -> Self {
        Self {
            name: config.account.name.clone(),
            address: config.account.address.clone(),
            shards: config.shards.clone(),
            gas: config.gas,
            timeout: config.timeout(),
            retry: RetryPolicy::from(&config.retry),
            withdrawals: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn shards(&self) -> &[u32] {
        &self.shards
    }

    #[must_use]
    pub const fn gas(&self) -> GasConfig {
        self.gas
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sums the funding balance over its shards and checks it against
    /// `minimum`.
    pub async fn ensure_minimum(
        &self,
        ledger: &dyn LedgerClient,
        minimum: Amount,
        policy: RetryPolicy,
    ) -> Result<Amount, FundingError> {
        let mut available = Amount::ZERO;
        for shard in &self.shards {
            let balance = query_balance(ledger, &self.address, *shard, policy)
                .await
                .map_err(|unmet| FundingError::BalanceUnavailable {
                    address: self.address.clone(),
                    shard: *shard,
                    reason: unmet.to_string(),
                })?;
            debug!(address = %self.address, shard, %balance, "funding account balance");
            available = available
                .checked_add(balance)
                .ok_or_else(|| FundingError::BalanceOverflow {
                    address: self.address.clone(),
                })?;
        }

        if available < minimum {
            return Err(FundingError::InsufficientFunds {
                address: self.address.clone(),
                shards: self.shards.clone(),
                available,
                minimum,
            });
        }
        info!(address = %self.address, %available, %minimum, "funding account ready");
        Ok(available)
    }

    /// Transfers `amount` to `target` on `shard` and waits until it is
    /// credited.
    ///
    /// Rejected submissions are retried with the funding retry budget; the
    /// balance check uses `confirm`.
    #[allow(clippy::too_many_arguments)]
    pub async fn fund(
        &self,
        ledger: &dyn LedgerClient,
        submitter: &dyn TxSubmitter,
        chain: ChainId,
        target: &Account,
        shard: u32,
        amount: Amount,
        confirm: RetryPolicy,
    ) -> Result<FundedAccount, FundingError> {
        let _withdrawal = self.withdrawals.lock().await;

        let starting = query_balance(ledger, &target.address, shard, confirm)
            .await
            .map_err(|unmet| FundingError::BalanceUnavailable {
                address: target.address.clone(),
                shard,
                reason: unmet.to_string(),
            })?;
        let expected = starting
            .checked_add(amount)
            .ok_or_else(|| FundingError::BalanceOverflow {
                address: target.address.clone(),
            })?;

        let request = TxRequest {
            sender: self.address.clone(),
            from_shard: shard,
            payload: TxPayload::Transfer {
                receiver: target.address.clone(),
                to_shard: shard,
                amount,
                data: None,
            },
            nonce: None,
            gas: self.gas,
            timeout: self.timeout,
        };

        let mut last_reason = String::from("no attempt made");
        let mut accepted = None;
        for attempt in 1..=self.retry.attempts {
            let record =
                TransactionRecord::from_outcome(&request, submitter.submit_native(chain, &request).await);
            if record.success {
                info!(
                    account = %target.name,
                    address = %target.address,
                    shard,
                    %amount,
                    tx_hash = record.hash.as_deref().unwrap_or_default(),
                    "funding transfer accepted"
                );
                accepted = Some(record);
                break;
            }

            last_reason = record
                .error
                .clone()
                .unwrap_or_else(|| "transaction rejected".to_owned());
            warn!(address = %target.address, shard, attempt, reason = %last_reason, "funding transfer failed");
            if attempt < self.retry.attempts && !self.retry.interval.is_zero() {
                sleep(self.retry.interval).await;
            }
        }

        let Some(record) = accepted else {
            return Err(FundingError::Transfer {
                account: target.name.clone(),
                address: target.address.clone(),
                shard,
                amount,
                attempts: self.retry.attempts,
                reason: last_reason,
            });
        };

        let balance = await_balance_at_least(ledger, &target.address, shard, expected, confirm)
            .await
            .map_err(|unmet| FundingError::NotCredited {
                account: target.name.clone(),
                address: target.address.clone(),
                shard,
                amount,
                reason: unmet.to_string(),
            })?;

        Ok(FundedAccount { record, balance })
    }
}
