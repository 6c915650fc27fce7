mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Workspace, context, seeded_ledger};
use testing_framework_config::Amount;
use testing_framework_core::{funding::FundingError, ledger::Account};
use testing_framework_ledger_sim::SimLedger;

#[tokio::test]
async fn unreadable_target_balance_stops_the_funding_transfer() -> Result<()> {
    let workspace = Workspace::with_cases("")?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);
    ledger.fail_queries(workspace.config.network.balance_retry.attempts);

    let target = Account::new("target", "one1target");
    let err = ctx
        .fund(&target, 0, Amount::from_whole(5))
        .await
        .expect_err("starting balance unreadable");

    assert!(matches!(
        err,
        FundingError::BalanceUnavailable { ref address, shard: 0, .. } if address == "one1target"
    ));
    assert!(ledger.submissions().is_empty());
    assert_eq!(ledger.balance_of("one1target", 0), Amount::ZERO);
    Ok(())
}

#[tokio::test]
async fn funding_balance_beyond_the_amount_range_fails_the_precheck() -> Result<()> {
    let workspace = Workspace::with_cases("")?;
    let funding = &workspace.config.funding.account.address;
    let half = Amount::from_base_units(u128::MAX / 2 + 1);
    let ledger = Arc::new(
        SimLedger::default()
            .with_funds(funding, 0, half)
            .with_funds(funding, 1, half),
    );
    let ctx = context(&workspace.config, &ledger);

    let err = ctx.preflight().await.expect_err("sum overflows");

    assert!(matches!(err, FundingError::BalanceOverflow { ref address } if address == funding));
    Ok(())
}
