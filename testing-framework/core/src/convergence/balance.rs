use testing_framework_config::Amount;

use super::{RetryPolicy, Unmet, await_condition};
use crate::ledger::LedgerClient;

/// Reads a balance, retrying failed queries. A missing balance reads as zero.
pub async fn query_balance(
    ledger: &dyn LedgerClient,
    address: &str,
    shard: u32,
    policy: RetryPolicy,
) -> Result<Amount, Unmet<Option<Amount>>> {
    await_condition(
        format!("balance of {address} on shard {shard} readable"),
        policy,
        || ledger.balance(address, shard),
        |_| true,
    )
    .await
    .map(Option::unwrap_or_default)
}

/// Waits until `address` holds a present, strictly positive balance.
pub async fn await_nonzero_balance(
    ledger: &dyn LedgerClient,
    address: &str,
    shard: u32,
    policy: RetryPolicy,
) -> Result<Amount, Unmet<Option<Amount>>> {
    await_condition(
        format!("non-zero balance for {address} on shard {shard}"),
        policy,
        || ledger.balance(address, shard),
        |balance| balance.is_some_and(|amount| !amount.is_zero()),
    )
    .await
    .map(Option::unwrap_or_default)
}

/// Waits until `address` holds at least `expected` on `shard`.
pub async fn await_balance_at_least(
    ledger: &dyn LedgerClient,
    address: &str,
    shard: u32,
    expected: Amount,
    policy: RetryPolicy,
) -> Result<Amount, Unmet<Option<Amount>>> {
    await_condition(
        format!("balance of at least {expected} for {address} on shard {shard}"),
        policy,
        || ledger.balance(address, shard),
        |balance| balance.is_some_and(|amount| amount >= expected),
    )
    .await
    .map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        ledger::{Delegation, ValidatorInfo},
        scenario::DynError,
    };

    /// Replays a scripted sequence of balance answers.
    struct ScriptedLedger {
        answers: Mutex<Vec<Result<Option<Amount>, &'static str>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLedger {
        fn new(mut answers: Vec<Result<Option<Amount>, &'static str>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn balance(&self, _address: &str, _shard: u32) -> Result<Option<Amount>, DynError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .answers
                .lock()
                .expect("answers lock")
                .pop()
                .unwrap_or(Ok(None));
            next.map_err(Into::into)
        }

        async fn validator(&self, _address: &str) -> Result<Option<ValidatorInfo>, DynError> {
            Ok(None)
        }

        async fn delegations_by_delegator(
            &self,
            _address: &str,
        ) -> Result<Vec<Delegation>, DynError> {
            Ok(Vec::new())
        }

        async fn current_epoch(&self, _shard: u32) -> Result<u64, DynError> {
            Ok(0)
        }
    }

    const POLICY: RetryPolicy = RetryPolicy::new(4, Duration::ZERO);

    #[tokio::test]
    async fn nonzero_balance_skips_missing_and_zero_values() {
        let ledger = ScriptedLedger::new(vec![
            Err("rpc down"),
            Ok(None),
            Ok(Some(Amount::ZERO)),
            Ok(Some(Amount::from_whole(5))),
        ]);

        let balance = await_nonzero_balance(&ledger, "one1x", 0, POLICY)
            .await
            .expect("credited");
        assert_eq!(balance, Amount::from_whole(5));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn threshold_balance_reports_last_observed_value() {
        let ledger = ScriptedLedger::new(vec![Ok(Some(Amount::from_whole(1))); 4]);

        let unmet = await_balance_at_least(&ledger, "one1x", 1, Amount::from_whole(2), POLICY)
            .await
            .expect_err("never reaches threshold");
        assert_eq!(unmet.last, Some(Some(Amount::from_whole(1))));
        assert!(unmet.to_string().contains("one1x on shard 1"));
    }

    #[tokio::test]
    async fn missing_balance_reads_as_zero() {
        let ledger = ScriptedLedger::new(vec![Ok(None)]);
        let balance = query_balance(&ledger, "one1x", 0, POLICY).await.expect("read");
        assert_eq!(balance, Amount::ZERO);
    }
}
