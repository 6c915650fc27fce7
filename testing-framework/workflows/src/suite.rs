use testing_framework_config::{Config, ConfigError, testcase::load_test_case_specs};
use testing_framework_core::{
    funding::FundingError,
    report::SuiteReport,
    scenario::{Orchestrator, RunContext, TestCase},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::flows::run_case;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to load test cases: {0}")]
    Load(#[from] ConfigError),
    #[error("funding account precheck failed: {0}")]
    Preflight(#[from] FundingError),
}

/// Loads the declared test cases below `framework.testcases`.
pub fn load_test_cases(config: &Config) -> Result<Vec<TestCase>, SuiteError> {
    let specs = load_test_case_specs(&config.framework.testcases)?;
    let cases = TestCase::from_specs(specs);
    info!(
        dir = %config.framework.testcases.display(),
        cases = cases.len(),
        dismissed = cases.iter().filter(|case| case.run.dismissal.is_some()).count(),
        "test cases loaded"
    );
    Ok(cases)
}

/// Runs `cases` one after another and aggregates their outcomes.
///
/// The funding account is checked first; when it cannot cover the configured
/// minimum no scenario runs. A kept validator is disabled once every case is
/// done.
pub async fn run_suite(ctx: &RunContext, mut cases: Vec<TestCase>) -> Result<SuiteReport, SuiteError> {
    let started = OffsetDateTime::now_utc();
    let available = ctx.preflight().await?;
    info!(
        funding = %ctx.funding().address(),
        %available,
        cases = cases.len(),
        "suite started"
    );

    let orchestrator = Orchestrator::new(ctx);
    for case in &mut cases {
        if let Some(reason) = &case.run.dismissal {
            info!(scenario = %case.name, %reason, "test case dismissed");
            continue;
        }
        run_case(&orchestrator, case).await;
    }

    if let Some(record) = ctx.release_kept_validator().await
        && !record.fully_swept()
    {
        warn!(account = %record.account, "kept validator was not fully released");
    }

    let finished = OffsetDateTime::now_utc();
    let settings = ctx.settings();
    let report = SuiteReport::collect(
        settings.identifier.clone(),
        ctx.network().network(),
        cases,
        started,
        finished,
    );
    info!(
        successful = report.successful_count(),
        failed = report.failed_count(),
        dismissed = report.dismissed_count(),
        "suite finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use testing_framework_config::Amount;
    use testing_framework_ledger_sim::SimLedger;

    use super::*;
    use crate::test_support::{FUNDING, case, config, context, ledger};

    #[tokio::test]
    async fn underfunded_suite_runs_nothing() {
        let config = config();
        let ledger = Arc::new(SimLedger::default().with_funds(FUNDING, 0, Amount::from_whole(5)));
        let ctx = context(&config, &ledger);
        let cases = vec![case("transfer", "transactions/standard", true, "{amount: 1}")];

        let err = run_suite(&ctx, cases).await.expect_err("precheck fails");

        assert!(matches!(
            err,
            SuiteError::Preflight(FundingError::InsufficientFunds { .. })
        ));
        assert!(ledger.submissions().is_empty());
        assert!(ledger.keys().is_empty());
    }

    #[tokio::test]
    async fn dismissed_cases_are_reported_without_running() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut disabled = case("disabled", "transactions/standard", true, "{amount: 1}");
        disabled.dismiss("execute flag disabled");
        let cases = vec![
            case("unknown", "staking/validator/rename", true, "{}"),
            disabled,
            case("transfer", "transactions/standard", true, "{amount: 1}"),
        ];

        let report = run_suite(&ctx, cases).await.expect("suite runs");

        assert_eq!(report.total(), 3);
        assert_eq!(report.dismissed_count(), 2);
        assert_eq!(report.successful_count(), 1);
        assert!(report.is_success());
        assert!(ledger.keys().is_empty());
    }

    #[tokio::test]
    async fn kept_validator_is_disabled_after_the_last_case() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let reuse = "{reuse_existing_validator: true}";
        let cases = vec![
            case("create", "staking/validator/create/standard", true, reuse),
            case("edit", "staking/validator/edit/standard", true, reuse),
        ];

        let report = run_suite(&ctx, cases).await.expect("suite runs");

        assert!(report.is_success(), "{report}");
        assert!(ctx.reused_validator().is_none());
        assert!(ledger.keys().is_empty());
        let disables = ledger
            .submissions()
            .into_iter()
            .filter(|submission| submission.kind == "edit_validator")
            .count();
        // One edit from the scenario, one disabling edit at the end.
        assert_eq!(disables, 2);
    }

    #[test]
    fn loads_cases_from_the_configured_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("10-transfers.yaml"),
            "- name: one\n  scenario: transactions/standard\n  parameters: {amount: 1}\n\
             - name: two\n  scenario: transactions.same_account\n  execute: false\n",
        )
        .expect("write cases");
        fs::write(
            dir.path().join("20-staking.yml"),
            "name: three\nscenario: staking/delegation/delegate/standard\n",
        )
        .expect("write cases");

        let mut config = config();
        config.framework.testcases = dir.path().to_path_buf();
        let cases = load_test_cases(&config).expect("cases load");

        let names: Vec<_> = cases.iter().map(|case| case.name.as_str()).collect();
        assert_eq!(names, ["one", "two", "three"]);
        assert!(cases[1].run.dismissal.is_some());
    }

    #[test]
    fn missing_directory_is_a_load_error() {
        let mut config = config();
        config.framework.testcases = "/nonexistent/harness/cases".into();

        assert!(matches!(load_test_cases(&config), Err(SuiteError::Load(_))));
    }
}
