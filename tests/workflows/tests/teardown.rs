mod common;

use anyhow::Result;
use common::{Workspace, context, seeded_ledger};
use testing_framework_core::{
    ledger::{LedgerClient as _, ValidatorStatus},
    scenario::SweepOutcome,
};
use testing_framework_workflows::{load_test_cases, run_suite};

#[tokio::test]
async fn transfer_accounts_are_swept_on_every_touched_shard() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: cross\n  scenario: transactions/same_account\n  \
         parameters: {amount: 4, from_shard: 0, to_shard: 1}\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;
    let case = &report.executed()[0];
    assert!(case.passed(), "{report}");

    let record = &case.run.teardown[0];
    let shards: Vec<_> = record.sweeps.iter().map(|sweep| sweep.shard).collect();
    assert_eq!(shards, [0, 1]);
    assert!(record.fully_swept());
    assert!(matches!(
        record.sweeps[1].outcome,
        SweepOutcome::Swept { .. }
    ));
    assert!(record.removed);

    let fee = workspace.config.funding.gas.max_fee();
    for shard in [0, 1] {
        assert!(ledger.balance_of(&record.address, shard) <= fee);
    }
    Ok(())
}

#[tokio::test]
async fn created_validators_are_disabled_at_teardown() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: delegate\n  scenario: staking/delegation/delegate/standard\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;
    let case = &report.executed()[0];
    assert!(case.passed(), "{report}");

    let validator = case
        .run
        .teardown
        .iter()
        .find(|record| record.role == "Validator")
        .expect("validator released");
    assert!(validator.disabled_validator.as_ref().is_some_and(|tx| tx.success));

    let info = ledger
        .validator(&validator.address)
        .await
        .map_err(anyhow::Error::msg)?
        .expect("validator still registered");
    assert_eq!(info.status, ValidatorStatus::Inactive);
    Ok(())
}

#[tokio::test]
async fn reused_validator_survives_until_the_suite_ends() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: create\n  scenario: staking/validator/create/standard\n  \
         parameters: {reuse_existing_validator: true}\n\
         - name: undelegate\n  scenario: staking/delegation/undelegate/standard\n  \
         parameters: {reuse_existing_validator: true}\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;
    assert!(report.is_success(), "{report}");

    let creates = ledger
        .submissions()
        .iter()
        .filter(|submission| submission.kind == "create_validator")
        .count();
    assert_eq!(creates, 1);
    for case in report.executed() {
        assert!(case.run.teardown.iter().all(|record| record.role != "Validator"));
    }
    assert!(ledger.keys().is_empty());
    Ok(())
}
