use std::{collections::HashSet, time::Duration};

use testing_framework_config::testcase::{ScenarioKind, TestCaseSpec};
use time::OffsetDateTime;
use tracing::warn;

use super::{Phase, ScenarioError, TeardownRecord, sanitize};
use crate::{convergence::Unmet, ledger::TransactionRecord};

/// One verification predicate and whether it held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
    pub label: String,
    pub held: bool,
    pub detail: String,
}

/// Verification predicates collected by a scenario.
#[derive(Clone, Debug, Default)]
pub struct Checks {
    items: Vec<CheckOutcome>,
}

impl Checks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: impl Into<String>, held: bool, detail: impl Into<String>) {
        self.items.push(CheckOutcome {
            label: label.into(),
            held,
            detail: detail.into(),
        });
    }

    /// Records a polled condition and hands back the value it converged on.
    /// The polled value may differ from the converged one, as with balance
    /// reads that map a missing balance to zero.
    pub fn condition<T, U>(
        &mut self,
        label: impl Into<String>,
        outcome: Result<T, Unmet<U>>,
    ) -> Option<T> {
        match outcome {
            Ok(value) => {
                self.record(label, true, "met");
                Some(value)
            }
            Err(unmet) => {
                self.record(label, false, unmet.to_string());
                None
            }
        }
    }

    #[must_use]
    pub fn all_held(&self) -> bool {
        self.items.iter().all(|check| check.held)
    }

    #[must_use]
    pub fn items(&self) -> &[CheckOutcome] {
        &self.items
    }
}

/// Mutable state of a single run, owned by the orchestrator while it runs.
#[derive(Clone, Debug, Default)]
pub struct RunState {
    pub phase: Phase,
    pub executed: bool,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    /// Transfers from the funding account into scenario accounts.
    pub funding: Vec<TransactionRecord>,
    /// Operations submitted by the scenario itself.
    pub transactions: Vec<TransactionRecord>,
    pub checks: Vec<CheckOutcome>,
    pub teardown: Vec<TeardownRecord>,
    pub result: bool,
    pub dismissal: Option<String>,
    pub error: Option<String>,
    /// Phase the run was in when it aborted.
    pub aborted_in: Option<Phase>,
}

/// A declared test case and the outcome of running it.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub name: String,
    pub scenario: String,
    pub kind: Option<ScenarioKind>,
    pub execute: bool,
    pub expected: bool,
    pub run: RunState,
}

impl TestCase {
    /// Builds a case from its declaration. Unknown scenario types, bad
    /// parameters and a disabled execute flag dismiss the case up front.
    #[must_use]
    pub fn from_spec(spec: TestCaseSpec) -> Self {
        let mut case = Self {
            name: spec.name,
            scenario: spec.scenario,
            kind: None,
            execute: spec.execute,
            expected: spec.expected,
            run: RunState::default(),
        };

        match ScenarioKind::parse(&case.scenario, &spec.parameters) {
            Ok(kind) => case.kind = Some(kind),
            Err(err) => case.dismiss(err.to_string()),
        }
        if case.run.dismissal.is_none() && !case.execute {
            case.dismiss("execute flag disabled");
        }
        case
    }

    /// Builds every case in declared order. A case whose sanitized name is
    /// already taken is dismissed so generated account names stay unique.
    #[must_use]
    pub fn from_specs(specs: impl IntoIterator<Item = TestCaseSpec>) -> Vec<Self> {
        let mut seen = HashSet::new();
        specs
            .into_iter()
            .map(|spec| {
                let mut case = Self::from_spec(spec);
                if !seen.insert(sanitize(&case.name)) {
                    warn!(name = %case.name, "duplicate test case name");
                    case.kind = None;
                    case.dismiss(format!("duplicate test case name `{}`", case.name));
                }
                case
            })
            .collect()
    }

    pub fn dismiss(&mut self, reason: impl Into<String>) {
        self.run.dismissal = Some(reason.into());
    }

    #[must_use]
    pub const fn is_dismissed(&self) -> bool {
        !self.run.executed && self.run.dismissal.is_some()
    }

    #[must_use]
    pub const fn passed(&self) -> bool {
        self.run.executed && self.run.result == self.expected
    }

    #[must_use]
    pub const fn failed(&self) -> bool {
        self.run.executed && self.run.result != self.expected
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        let elapsed = self.run.finished_at? - self.run.started_at?;
        Duration::try_from(elapsed).ok()
    }

    pub(crate) fn begin(&mut self) {
        self.run.executed = true;
        self.run.started_at = Some(OffsetDateTime::now_utc());
    }

    pub(crate) fn finish(
        &mut self,
        outcome: Result<Checks, ScenarioError>,
        teardown: Vec<TeardownRecord>,
    ) {
        self.run.teardown = teardown;
        match outcome {
            Ok(checks) => {
                let submitted_ok = self.run.transactions.iter().all(|tx| tx.success);
                self.run.result = submitted_ok && checks.all_held();
                self.run.checks = checks.items;
                self.run.phase = Phase::Finished;
            }
            Err(err) => {
                self.run.result = false;
                self.run.error = Some(err.to_string());
                self.run.aborted_in = Some(self.run.phase);
                self.run.phase = Phase::Aborted;
            }
        }
        self.run.finished_at = Some(OffsetDateTime::now_utc());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, scenario: &str, execute: bool) -> TestCaseSpec {
        TestCaseSpec {
            name: name.to_owned(),
            scenario: scenario.to_owned(),
            execute,
            expected: true,
            parameters: serde_yaml::from_str("amount: 1").expect("parameters"),
        }
    }

    #[test]
    fn unknown_scenario_and_disabled_cases_are_dismissed() {
        let cases = TestCase::from_specs([
            spec("ok", "transactions/standard", true),
            spec("unknown", "transactions/teleport", true),
            spec("off", "transactions/standard", false),
        ]);

        assert!(cases[0].kind.is_some());
        assert!(cases[0].run.dismissal.is_none());
        assert_eq!(
            cases[1].run.dismissal.as_deref(),
            Some("unrecognized scenario type `transactions/teleport`")
        );
        assert_eq!(cases[2].run.dismissal.as_deref(), Some("execute flag disabled"));
        assert!(cases[1].is_dismissed() && cases[2].is_dismissed());
    }

    #[test]
    fn duplicate_sanitized_names_are_dismissed() {
        let cases = TestCase::from_specs([
            spec("send one", "transactions/standard", true),
            spec("Send-One", "transactions/standard", true),
        ]);
        assert!(cases[0].run.dismissal.is_none());
        assert!(cases[1].kind.is_none());
        assert!(cases[1].is_dismissed());
    }

    #[test]
    fn conditions_accept_balance_reads() {
        use testing_framework_config::Amount;

        use crate::convergence::ConditionError;

        let mut checks = Checks::new();
        let met: Result<Amount, Unmet<Option<Amount>>> = Ok(Amount::from_whole(3));
        assert_eq!(checks.condition("credited", met), Some(Amount::from_whole(3)));

        let unmet: Result<Amount, Unmet<Option<Amount>>> = Err(Unmet {
            last: Some(None),
            error: ConditionError::Exhausted {
                expectation: "balance of one1r on shard 0 at least 3".to_owned(),
                attempts: 2,
                observed: Some("none".to_owned()),
                source: None,
            },
        });
        assert_eq!(checks.condition("credited again", unmet), None);

        assert!(!checks.all_held());
        let items = checks.items();
        assert!(items[0].held);
        assert!(!items[1].held);
        assert!(items[1].detail.starts_with("balance of one1r on shard 0 at least 3"));
    }

    #[test]
    fn result_requires_successful_transactions_and_checks() {
        let mut case = TestCase::from_spec(spec("t", "transactions/standard", true));
        case.begin();
        let mut checks = Checks::new();
        checks.record("balance", true, "met");
        case.finish(Ok(checks), Vec::new());
        assert!(case.run.result);
        assert!(case.passed());
        assert_eq!(case.run.phase, Phase::Finished);

        let mut aborted = TestCase::from_spec(spec("a", "transactions/standard", true));
        aborted.begin();
        aborted.run.phase = Phase::Funding;
        aborted.finish(
            Err(ScenarioError::MissingRole { role: "Sender" }),
            Vec::new(),
        );
        assert!(!aborted.run.result);
        assert!(aborted.failed());
        assert_eq!(aborted.run.aborted_in, Some(Phase::Funding));
        assert_eq!(aborted.run.phase, Phase::Aborted);
        assert!(aborted.duration().is_some());
    }
}
