use std::{any::Any, collections::BTreeMap, panic::AssertUnwindSafe};

use futures::FutureExt as _;
use tracing::{info, warn};

use crate::{
    funding::{FundingError, FundingPlan},
    ledger::Account,
    scenario::{
        Checks, KeptValidator, LeaseSet, Phase, RoleSpec, RunContext, ScenarioError, ScenarioFlow, Step, TestCase,
    },
};

/// Drives one scenario through provisioning, funding, execution, verification
/// and teardown.
pub struct Orchestrator<'a> {
    ctx: &'a RunContext,
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub const fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Runs `flow` for `case` to completion. Teardown of every leased account
    /// is attempted regardless of how earlier phases ended, including a
    /// panicking flow.
    pub async fn run<F>(&self, case: &mut TestCase, flow: &F)
    where
        F: ScenarioFlow,
    {
        case.begin();
        info!(scenario = %case.name, kind = flow.name(), expected = case.expected, "scenario started");

        let roles = flow.roles();
        let mut leases = LeaseSet::default();
        let mut reused = BTreeMap::new();

        let outcome = AssertUnwindSafe(self.drive(case, flow, &roles, &mut leases, &mut reused))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ScenarioError::Panicked {
                    message: panic_message(panic),
                })
            });

        if let Err(err) = &outcome {
            warn!(scenario = %case.name, phase = %case.run.phase, %err, "scenario aborted");
        }

        self.keep_reusable(&roles, &reused, &mut leases);

        let aborted_in = case.run.phase;
        Self::enter(case, Phase::TearingDown);
        let teardown = leases.release_all(self.ctx).await;
        if outcome.is_err() {
            case.run.phase = aborted_in;
        }

        case.finish(outcome, teardown);
        info!(
            scenario = %case.name,
            result = case.run.result,
            expected = case.expected,
            passed = case.passed(),
            "scenario finished"
        );
    }

    async fn drive<F>(
        &self,
        case: &mut TestCase,
        flow: &F,
        roles: &[RoleSpec],
        leases: &mut LeaseSet,
        reused: &mut BTreeMap<&'static str, Account>,
    ) -> Result<Checks, ScenarioError>
    where
        F: ScenarioFlow,
    {
        Self::enter(case, Phase::Provisioning);
        self.provision(&case.name, roles, leases, reused).await?;

        Self::enter(case, Phase::Funding);
        self.fund(case, roles, leases, reused).await?;

        Self::enter(case, Phase::Executing);
        let mut step = Step::new(self.ctx, leases, reused, &mut case.run);
        let snapshot = flow.execute(&mut step).await?;

        step.enter(Phase::Verifying);
        let checks = flow.verify(&mut step, snapshot).await?;
        Ok(checks)
    }

    async fn provision(
        &self,
        case_name: &str,
        roles: &[RoleSpec],
        leases: &mut LeaseSet,
        reused: &mut BTreeMap<&'static str, Account>,
    ) -> Result<(), ScenarioError> {
        for spec in roles {
            if spec.reusable_validator
                && let Some(account) = self.ctx.reused_validator()
            {
                info!(role = spec.role, address = %account.address, "reusing kept validator");
                reused.insert(spec.role, account);
                continue;
            }

            let name = self.ctx.account_name(case_name, spec.role);
            let mut account = self
                .ctx
                .keystore()
                .generate(&name)
                .await
                .map_err(|source| ScenarioError::Provision {
                    role: spec.role,
                    name: name.clone(),
                    source,
                })?;
            account.shard = spec.shard;
            info!(role = spec.role, account = %account.name, address = %account.address, shard = spec.shard, "account provisioned");
            leases.acquire(spec.role, account);
        }
        Ok(())
    }

    async fn fund(
        &self,
        case: &mut TestCase,
        roles: &[RoleSpec],
        leases: &mut LeaseSet,
        reused: &BTreeMap<&'static str, Account>,
    ) -> Result<(), ScenarioError> {
        for spec in roles {
            let Some(request) = spec.funding else {
                continue;
            };
            if reused.contains_key(spec.role) {
                continue;
            }
            let lease = leases
                .get_mut(spec.role)
                .ok_or(ScenarioError::MissingRole { role: spec.role })?;

            let margin = request
                .fees()
                .and_then(|fees| fees.checked_add(self.ctx.settings().funding_margin))
                .ok_or(FundingError::Overflow {
                    amount: request.amount,
                    multiple: request.multiple,
                })?;
            let plan = FundingPlan::compute(request.amount, request.multiple, margin)?;
            info!(
                role = spec.role,
                address = %lease.account().address,
                shard = spec.shard,
                amount = %plan.total,
                "funding account"
            );

            let funded = self.ctx.fund(lease.account(), spec.shard, plan.total).await?;
            lease.account_mut().balance = funded.balance;
            case.run.funding.push(funded.record);
        }
        Ok(())
    }

    fn keep_reusable(
        &self,
        roles: &[RoleSpec],
        reused: &BTreeMap<&'static str, Account>,
        leases: &mut LeaseSet,
    ) {
        for spec in roles {
            if !spec.reusable_validator || reused.contains_key(spec.role) {
                continue;
            }
            let created = leases.get(spec.role).is_some_and(|lease| lease.is_validator());
            if created && let Some((account, Some(gas))) = leases.retain(spec.role) {
                self.ctx.keep_validator(KeptValidator { account, gas });
            }
        }
    }

    fn enter(case: &mut TestCase, phase: Phase) {
        info!(scenario = %case.name, from = %case.run.phase, to = %phase, "phase transition");
        case.run.phase = phase;
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}
