mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{Workspace, context, seeded_ledger};
use testing_framework_config::{Amount, testcase::TestCaseSpec};
use testing_framework_core::scenario::{
    Checks, Orchestrator, Phase, RoleSpec, ScenarioError, ScenarioFlow, Step, SweepOutcome,
    TestCase,
};
use testing_framework_workflows::run_case;

/// Provisions a funded sender, an unfunded receiver and the kept validator,
/// then panics halfway through execution.
struct CrashingFlow;

#[async_trait]
impl ScenarioFlow for CrashingFlow {
    type Snapshot = ();

    fn name(&self) -> &'static str {
        "crashing"
    }

    fn roles(&self) -> Vec<RoleSpec> {
        vec![
            RoleSpec::funded("Sender", 0, Amount::from_whole(5)),
            RoleSpec::unfunded("Receiver", 1),
            RoleSpec::funded("Validator", 0, Amount::from_whole(10_000)).reusable_validator(true),
        ]
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<(), ScenarioError> {
        step.touch_shard("Sender", 1);
        assert!(step.is_reused("Validator"));
        panic!("ledger answered with garbage");
    }

    async fn verify(&self, _step: &mut Step<'_>, _snapshot: ()) -> Result<Checks, ScenarioError> {
        Ok(Checks::new())
    }
}

fn case(name: &str, scenario: &str, parameters: &str) -> Result<TestCase> {
    Ok(TestCase::from_spec(TestCaseSpec {
        name: name.to_owned(),
        scenario: scenario.to_owned(),
        execute: true,
        expected: true,
        parameters: serde_yaml::from_str(parameters)?,
    }))
}

#[tokio::test]
async fn panicking_flow_still_releases_every_leased_account() -> Result<()> {
    let workspace = Workspace::with_cases("")?;
    let ledger = seeded_ledger(&workspace.config);
    let ctx = context(&workspace.config, &ledger);
    let orchestrator = Orchestrator::new(&ctx);

    let mut create = case(
        "create",
        "staking/validator/create/standard",
        "{reuse_existing_validator: true}",
    )?;
    run_case(&orchestrator, &mut create).await;
    assert!(create.passed(), "{:?}", create.run.error);
    let kept = ctx.reused_validator().expect("validator kept");

    let mut crashed = case("crashed", "transactions/standard", "{amount: 5}")?;
    orchestrator.run(&mut crashed, &CrashingFlow).await;

    assert!(crashed.failed());
    assert_eq!(crashed.run.phase, Phase::Aborted);
    assert_eq!(crashed.run.aborted_in, Some(Phase::Executing));
    assert_eq!(
        crashed.run.error.as_deref(),
        Some("scenario panicked: ledger answered with garbage")
    );
    assert_eq!(crashed.run.funding.len(), 1);

    let mut roles: Vec<_> = crashed.run.teardown.iter().map(|record| record.role).collect();
    roles.sort_unstable();
    assert_eq!(roles, ["Receiver", "Sender"]);
    assert!(crashed.run.teardown.iter().all(|record| record.removed));
    assert!(crashed.run.teardown.iter().all(|record| record.address != kept.address));

    let sender = crashed
        .run
        .teardown
        .iter()
        .find(|record| record.role == "Sender")
        .expect("sender released");
    let shards: Vec<_> = sender.sweeps.iter().map(|sweep| sweep.shard).collect();
    assert_eq!(shards, [0, 1]);
    assert!(sender.fully_swept());
    assert!(matches!(sender.sweeps[0].outcome, SweepOutcome::Swept { .. }));
    let fee = workspace.config.funding.gas.max_fee();
    assert!(ledger.balance_of(&sender.address, 0) <= fee);

    assert_eq!(ledger.keys(), [kept.name.clone()]);
    let still_kept = ctx.reused_validator().expect("validator still kept");
    assert_eq!(still_kept.address, kept.address);
    Ok(())
}
