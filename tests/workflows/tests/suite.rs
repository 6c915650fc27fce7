mod common;

use std::fs;

use anyhow::Result;
use common::{SEED_FUNDS, Workspace, context, demo_config, demos_dir, seeded_ledger};
use testing_framework_config::Amount;
use testing_framework_core::{report::export::exporter_for, scenario::Phase};
use testing_framework_workflows::{SuiteError, load_test_cases, run_suite};

#[tokio::test]
async fn demo_suite_passes_against_the_simulated_ledger() -> Result<()> {
    let export = tempfile::tempdir()?;
    let config = demo_config(demos_dir().join("testcases"), export.path().to_path_buf())?;
    let ledger = seeded_ledger(&config);
    let ctx = context(&config, &ledger);

    let cases = load_test_cases(&config)?;
    assert_eq!(cases.len(), 25);
    let report = run_suite(&ctx, cases).await?;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.dismissed_count(), 2);
    assert_eq!(report.successful_count(), 23);
    assert_eq!(report.total(), 25);

    // Every generated key was swept and removed, the kept validator included.
    assert!(ledger.keys().is_empty(), "{:?}", ledger.keys());
    assert!(ctx.reused_validator().is_none());
    // Shard 1 only carried transfers, so nothing but fees is lost there.
    let funding = &config.funding.account.address;
    assert!(ledger.balance_of(funding, 1) > SEED_FUNDS.saturating_sub(Amount::from_whole(1)));

    let path = exporter_for(&config.export)
        .export(&report)?
        .expect("csv export");
    let csv = fs::read_to_string(path)?;
    assert!(csv.starts_with("name,scenario,status"));
    assert_eq!(csv.lines().filter(|line| line.contains(",dismissed,")).count(), 2);
    Ok(())
}

#[tokio::test]
async fn refused_operation_fails_only_its_case() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: create\n  scenario: staking/validator/create/standard\n\
         - name: transfer\n  scenario: transactions/standard\n  parameters: {amount: 1}\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    ledger.reject_kind("create_validator");
    let ctx = context(&workspace.config, &ledger);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;

    assert!(!report.is_success());
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.successful_count(), 1);
    let failed = report.failed().next().expect("one failure");
    assert_eq!(failed.name, "create");
    assert_eq!(failed.run.phase, Phase::Finished);
    assert!(failed.run.transactions.iter().all(|tx| !tx.success));
    assert!(report.to_string().contains("Testcase create"));
    Ok(())
}

#[tokio::test]
async fn funding_failure_aborts_the_case_and_releases_accounts() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: starved\n  scenario: transactions/standard\n  parameters: {amount: 1}\n\
         - name: healthy\n  scenario: transactions/same_account\n  parameters: {amount: 1}\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);
    ledger.fail_submissions(workspace.config.funding.retry.attempts);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;

    let starved = report
        .executed()
        .iter()
        .find(|case| case.name == "starved")
        .expect("starved case executed");
    assert!(starved.failed());
    assert_eq!(starved.run.phase, Phase::Aborted);
    assert_eq!(starved.run.aborted_in, Some(Phase::Funding));
    assert!(starved.run.error.as_deref().is_some_and(|err| err.contains("funding")));
    assert!(starved.run.teardown.iter().all(|record| record.removed));

    let healthy = report
        .executed()
        .iter()
        .find(|case| case.name == "healthy")
        .expect("healthy case executed");
    assert!(healthy.passed());
    assert!(ledger.keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_ledger_fails_the_precheck() -> Result<()> {
    let workspace = Workspace::with_cases(
        "- name: transfer\n  scenario: transactions/standard\n  parameters: {amount: 1}\n",
    )?;
    let ledger = seeded_ledger(&workspace.config);
    ledger.fail_queries(workspace.config.network.retry.attempts);
    let ctx = context(&workspace.config, &ledger);

    let err = run_suite(&ctx, load_test_cases(&workspace.config)?)
        .await
        .expect_err("precheck fails");

    assert!(matches!(err, SuiteError::Preflight(_)));
    assert!(ledger.submissions().is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_suite_reports_cleanly() -> Result<()> {
    let workspace = Workspace::with_cases("")?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);

    let report = run_suite(&ctx, load_test_cases(&workspace.config)?).await?;

    assert_eq!(report.total(), 0);
    assert!(report.is_success());
    assert!(report.to_string().contains("0 test case(s)"));
    Ok(())
}
