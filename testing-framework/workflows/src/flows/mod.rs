//! Scenario flows, one per [`ScenarioKind`].

mod delegation;
mod staking;
mod transfer;
mod validator;

pub use delegation::{DelegateFlow, RedelegateFlow, UndelegateFlow};
pub use transfer::{MultipleSendersFlow, SameAccountTransferFlow, TransferFlow};
use testing_framework_config::testcase::ScenarioKind;
use testing_framework_core::scenario::{Orchestrator, TestCase};
pub use validator::{CreateValidatorFlow, Duplicate, DuplicateValidatorFlow, EditValidatorFlow};

pub const SENDER: &str = "Sender";
pub const VALIDATOR: &str = "Validator";
pub const DELEGATOR: &str = "Delegator";
pub const RECEIVERS: [&str; 8] = [
    "Receiver1",
    "Receiver2",
    "Receiver3",
    "Receiver4",
    "Receiver5",
    "Receiver6",
    "Receiver7",
    "Receiver8",
];
pub const SENDERS: [&str; 8] = [
    "Sender1", "Sender2", "Sender3", "Sender4", "Sender5", "Sender6", "Sender7", "Sender8",
];

/// Whether a scenario follows the protocol or deliberately breaks it by
/// sending on behalf of another account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    Standard,
    /// The transaction is signed by a third account, so the ledger is
    /// expected to refuse it.
    Mismatched,
}

/// Validator a staking operation is aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Registered,
    /// A bare account that is never registered, so the ledger is expected
    /// to refuse the operation.
    Unregistered,
}

/// Runs `case` with the flow matching its scenario kind. Dismissed cases are
/// left untouched.
pub async fn run_case(orchestrator: &Orchestrator<'_>, case: &mut TestCase) {
    use Addressing::{Mismatched, Standard};
    use Target::{Registered, Unregistered};

    let Some(kind) = case.kind.clone() else {
        return;
    };

    match kind {
        ScenarioKind::Transfer(params) => {
            orchestrator.run(case, &TransferFlow::new(params)).await;
        }
        ScenarioKind::SameAccountTransfer(params) => {
            orchestrator
                .run(case, &SameAccountTransferFlow::new(params))
                .await;
        }
        ScenarioKind::MultipleSenders(params) => {
            orchestrator.run(case, &MultipleSendersFlow::new(params)).await;
        }
        ScenarioKind::MultipleReceiversInvalidNonce(params) => {
            orchestrator
                .run(case, &TransferFlow::repeating_nonce(params))
                .await;
        }
        ScenarioKind::CreateValidator(params) => {
            orchestrator
                .run(case, &CreateValidatorFlow::new(params, Standard))
                .await;
        }
        ScenarioKind::CreateValidatorInvalidAddress(params) => {
            orchestrator
                .run(case, &CreateValidatorFlow::new(params, Mismatched))
                .await;
        }
        ScenarioKind::CreateValidatorAlreadyExists(params) => {
            orchestrator
                .run(case, &DuplicateValidatorFlow::new(params, Duplicate::Address))
                .await;
        }
        ScenarioKind::CreateValidatorExistingBlsKey(params) => {
            orchestrator
                .run(case, &DuplicateValidatorFlow::new(params, Duplicate::BlsKeys))
                .await;
        }
        ScenarioKind::EditValidator(params) => {
            orchestrator
                .run(case, &EditValidatorFlow::new(params, Standard, Registered))
                .await;
        }
        ScenarioKind::EditValidatorInvalidAddress(params) => {
            orchestrator
                .run(case, &EditValidatorFlow::new(params, Mismatched, Registered))
                .await;
        }
        ScenarioKind::EditValidatorNonExisting(params) => {
            orchestrator
                .run(case, &EditValidatorFlow::new(params, Standard, Unregistered))
                .await;
        }
        ScenarioKind::Delegate(params) => {
            orchestrator
                .run(case, &DelegateFlow::new(params, Standard, Registered))
                .await;
        }
        ScenarioKind::DelegateInvalidAddress(params) => {
            orchestrator
                .run(case, &DelegateFlow::new(params, Mismatched, Registered))
                .await;
        }
        ScenarioKind::DelegateNonExisting(params) => {
            orchestrator
                .run(case, &DelegateFlow::new(params, Standard, Unregistered))
                .await;
        }
        ScenarioKind::Undelegate(params) => {
            orchestrator
                .run(case, &UndelegateFlow::new(params, Standard, Registered))
                .await;
        }
        ScenarioKind::UndelegateInvalidAddress(params) => {
            orchestrator
                .run(case, &UndelegateFlow::new(params, Mismatched, Registered))
                .await;
        }
        ScenarioKind::UndelegateNonExisting(params) => {
            orchestrator
                .run(case, &UndelegateFlow::new(params, Standard, Unregistered))
                .await;
        }
        ScenarioKind::Redelegate(params) => {
            orchestrator
                .run(case, &RedelegateFlow::new(params, false))
                .await;
        }
        ScenarioKind::RedelegateNextEpoch(params) => {
            orchestrator
                .run(case, &RedelegateFlow::new(params, true))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use testing_framework_config::{Amount, testcase::TransferParams};
    use testing_framework_core::{ledger::LedgerClient as _, scenario::Phase};

    use super::*;
    use crate::test_support::{FUNDING, case, config, context, ledger};

    async fn run_one(scenario: &str, expected: bool, parameters: &str) -> TestCase {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut case = case("unit case", scenario, expected, parameters);
        run_case(&Orchestrator::new(&ctx), &mut case).await;
        case
    }

    fn describe(case: &TestCase) -> String {
        format!("{:?} {:?} {:?}", case.run.error, case.run.checks, case.run.transactions)
    }

    #[tokio::test]
    async fn transfer_reaches_every_receiver() {
        let case = run_one(
            "transactions/standard",
            true,
            "{amount: 5, receiver_count: 3, nonce: 0}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        assert_eq!(case.run.transactions.len(), 3);
        assert!(case.run.transactions.iter().all(|tx| tx.kind == "transfer"));
        assert_eq!(case.run.phase, Phase::Finished);
    }

    #[tokio::test]
    async fn zero_amount_transfer_aborts_while_funding() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut case = case("zero amount", "transactions/standard", true, "{amount: 1}");
        let flow = TransferFlow::new(TransferParams {
            receiver_count: 3,
            ..TransferParams::default()
        });
        Orchestrator::new(&ctx).run(&mut case, &flow).await;

        assert!(case.failed());
        assert_eq!(case.run.phase, Phase::Aborted);
        assert_eq!(case.run.aborted_in, Some(Phase::Funding));
        assert!(
            case.run
                .error
                .as_deref()
                .is_some_and(|error| error.contains("amount must be greater than zero"))
        );
        assert!(case.run.funding.is_empty());
        assert!(ledger.submissions().is_empty());
        assert!(ledger.keys().is_empty());
    }

    #[tokio::test]
    async fn overflowing_nonce_sequence_aborts_before_submitting() {
        let case = run_one(
            "transactions/standard",
            true,
            "{amount: 1, receiver_count: 2, nonce: 18446744073709551615}",
        )
        .await;

        assert!(case.failed());
        assert_eq!(case.run.aborted_in, Some(Phase::Executing));
        assert!(case.run.transactions.is_empty());
        assert!(
            case.run
                .error
                .as_deref()
                .is_some_and(|error| error.contains("nonce 18446744073709551615 overflows"))
        );
    }

    #[tokio::test]
    async fn cross_shard_transfer_credits_receivers_on_target_shard() {
        let case = run_one(
            "transactions/standard",
            true,
            "{amount: 2, from_shard: 1, to_shard: 0}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        assert_eq!(case.run.transactions[0].receiver_shard, 0);
    }

    #[tokio::test]
    async fn same_account_transfer_only_costs_fees() {
        let same_shard = run_one("transactions/same_account", true, "{amount: 3}").await;
        let cross_shard = run_one(
            "transactions/same_account",
            true,
            "{amount: 3, from_shard: 0, to_shard: 1}",
        )
        .await;

        assert!(same_shard.passed(), "{}", describe(&same_shard));
        assert!(cross_shard.passed(), "{}", describe(&cross_shard));
    }

    #[tokio::test]
    async fn eth_dialect_transfer_is_sent_over_eth() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut case = case(
            "eth transfer",
            "transactions/standard",
            true,
            "{amount: 1, rpc_prefix: eth}",
        );
        run_case(&Orchestrator::new(&ctx), &mut case).await;

        assert!(case.passed(), "{}", describe(&case));
        let submissions = ledger.submissions();
        assert!(
            submissions
                .iter()
                .any(|submission| submission.dialect == testing_framework_config::Dialect::Eth)
        );
    }

    #[tokio::test]
    async fn create_validator_registers_and_disables_at_teardown() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut case = case("create", "staking/validator/create/standard", true, "{}");
        run_case(&Orchestrator::new(&ctx), &mut case).await;

        assert!(case.passed(), "{}", describe(&case));
        let teardown = case
            .run
            .teardown
            .iter()
            .find(|record| record.role == VALIDATOR)
            .expect("validator released");
        assert!(teardown.disabled_validator.as_ref().is_some_and(|tx| tx.success));

        let info = ledger
            .validator(&teardown.address)
            .await
            .expect("query")
            .expect("validator registered");
        assert_ne!(info.status, testing_framework_core::ledger::ValidatorStatus::Active);
    }

    #[tokio::test]
    async fn create_validator_for_another_address_is_refused() {
        let case = run_one("staking/validator/create/invalid_address", false, "{}").await;

        assert!(case.passed(), "{}", describe(&case));
        assert!(!case.run.result);
        assert!(case.run.transactions.iter().any(|tx| !tx.success));
    }

    #[tokio::test]
    async fn edit_validator_is_repeated_and_observed() {
        let case = run_one(
            "staking/validator/edit/standard",
            true,
            "{edit: {changes: {website: \"https://example.org\"}, repeat: 2}}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        let edits = case
            .run
            .transactions
            .iter()
            .filter(|tx| tx.kind == "edit_validator")
            .count();
        assert_eq!(edits, 2);
        assert_eq!(case.run.checks.len(), 2);
    }

    #[tokio::test]
    async fn delegate_and_undelegate() {
        let delegate = run_one("staking/delegation/delegate/standard", true, "{}").await;
        let undelegate = run_one(
            "staking/delegation/undelegate/standard",
            true,
            "{delegation: {delegate: 300, undelegate: 120}}",
        )
        .await;

        assert!(delegate.passed(), "{}", describe(&delegate));
        assert!(undelegate.passed(), "{}", describe(&undelegate));
    }

    #[tokio::test]
    async fn delegating_for_another_account_is_refused() {
        let case = run_one("staking/delegation/delegate/invalid_address", false, "{}").await;

        assert!(case.passed(), "{}", describe(&case));
        let delegation = case
            .run
            .transactions
            .iter()
            .find(|tx| tx.kind == "delegate")
            .expect("delegation submitted");
        assert!(!delegation.success);
    }

    #[tokio::test]
    async fn redelegation_draws_on_locked_tokens() {
        let case = run_one(
            "staking/delegation/redelegate/standard",
            true,
            "{delegation: {delegate: 150, undelegate: 100}}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        let kinds: Vec<_> = case.run.transactions.iter().map(|tx| tx.kind).collect();
        assert_eq!(
            kinds,
            ["create_validator", "delegate", "undelegate", "delegate"]
        );
    }

    #[tokio::test]
    async fn redelegation_waits_for_the_next_epoch() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let before = ledger.epoch();
        let mut case = case(
            "next epoch",
            "staking/delegation/redelegate/locked_tokens",
            true,
            "{}",
        );
        run_case(&Orchestrator::new(&ctx), &mut case).await;

        assert!(case.passed(), "{}", describe(&case));
        assert!(ledger.epoch() > before);
    }

    #[tokio::test]
    async fn refused_prerequisite_stops_the_flow() {
        let config = config();
        let ledger = ledger();
        ledger.reject_kind("create_validator");
        let ctx = context(&config, &ledger);
        let mut case = case("blocked", "staking/delegation/delegate/standard", true, "{}");
        run_case(&Orchestrator::new(&ctx), &mut case).await;

        assert!(case.failed());
        assert_eq!(case.run.phase, Phase::Finished);
        assert!(case.run.transactions.iter().all(|tx| tx.kind == "create_validator"));
        assert!(!case.run.checks.is_empty());
        assert!(ledger.balance_of(FUNDING, 0) > Amount::from_whole(999_000));
    }

    #[tokio::test]
    async fn kept_validator_is_shared_between_cases() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let orchestrator = Orchestrator::new(&ctx);
        let reuse = "{reuse_existing_validator: true}";

        let mut create = case("first", "staking/validator/create/standard", true, reuse);
        let mut delegate = case("second", "staking/delegation/delegate/standard", true, reuse);
        run_case(&orchestrator, &mut create).await;
        run_case(&orchestrator, &mut delegate).await;

        assert!(create.passed(), "{}", describe(&create));
        assert!(delegate.passed(), "{}", describe(&delegate));
        let kept = ctx.reused_validator().expect("validator kept");
        assert!(delegate.run.transactions.iter().all(|tx| tx.kind != "create_validator"));
        assert!(delegate.run.teardown.iter().all(|record| record.address != kept.address));

        let released = ctx.release_kept_validator().await.expect("kept validator released");
        assert!(released.disabled_validator.is_some_and(|tx| tx.success));
        assert!(ctx.reused_validator().is_none());
    }

    fn refusal<'a>(case: &'a TestCase, kind: &str) -> Option<&'a str> {
        case.run
            .transactions
            .iter()
            .filter(|tx| tx.kind == kind)
            .find(|tx| !tx.success)
            .and_then(|tx| tx.error.as_deref())
    }

    #[tokio::test]
    async fn multiple_senders_pay_one_receiver() {
        let case = run_one(
            "transactions/multiple_senders",
            true,
            "{amount: 2, sender_count: 3, from_shard: 0, to_shard: 1}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        assert_eq!(case.run.transactions.len(), 3);
        assert!(case.run.transactions.iter().all(|tx| tx.success));
        let senders: Vec<_> = case.run.transactions.iter().map(|tx| &tx.sender).collect();
        assert_eq!(
            senders.len(),
            senders.iter().collect::<std::collections::BTreeSet<_>>().len()
        );
    }

    #[tokio::test]
    async fn repeated_nonce_only_lets_the_first_transfer_through() {
        let case = run_one(
            "transactions/multiple_receivers_invalid_nonce",
            false,
            "{amount: 1, receiver_count: 3}",
        )
        .await;

        assert!(case.passed(), "{}", describe(&case));
        let accepted: Vec<_> = case.run.transactions.iter().map(|tx| tx.success).collect();
        assert_eq!(accepted, [true, false, false]);
        assert!(refusal(&case, "transfer").is_some_and(|error| error.contains("nonce mismatch")));
    }

    #[tokio::test]
    async fn registering_a_validator_twice_is_refused() {
        let case = run_one("staking/validator/create/already_exists", false, "{}").await;

        assert!(case.passed(), "{}", describe(&case));
        let kinds: Vec<_> = case.run.transactions.iter().map(|tx| tx.kind).collect();
        assert_eq!(kinds, ["create_validator", "create_validator"]);
        assert!(
            refusal(&case, "create_validator").is_some_and(|error| error.contains("already exists"))
        );
    }

    #[tokio::test]
    async fn reused_bls_keys_are_refused() {
        let config = config();
        let ledger = ledger();
        let ctx = context(&config, &ledger);
        let mut case = case(
            "bls",
            "staking/validator/create/existing_bls_key",
            false,
            "{}",
        );
        run_case(&Orchestrator::new(&ctx), &mut case).await;

        assert!(case.passed(), "{}", describe(&case));
        assert!(
            refusal(&case, "create_validator")
                .is_some_and(|error| error.contains("is already used by validator"))
        );
        let candidate = case
            .run
            .teardown
            .iter()
            .find(|record| record.role == SENDER)
            .expect("sender released");
        assert!(candidate.disabled_validator.is_none());
        assert!(ledger.validator(&candidate.address).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn editing_someone_elses_or_a_missing_validator_is_refused() {
        let foreign = run_one("staking/validator/edit/invalid_address", false, "{}").await;
        let missing = run_one("staking/validator/edit/non_existing", false, "{}").await;

        assert!(foreign.passed(), "{}", describe(&foreign));
        assert!(missing.passed(), "{}", describe(&missing));
        assert!(
            refusal(&foreign, "edit_validator")
                .is_some_and(|error| error.contains("cannot act as validator"))
        );
        assert!(refusal(&missing, "edit_validator").is_some_and(|error| error.contains("does not exist")));
        assert!(missing.run.transactions.iter().all(|tx| tx.kind != "create_validator"));
    }

    #[tokio::test]
    async fn staking_against_a_missing_validator_is_refused() {
        let delegate = run_one("staking/delegation/delegate/non_existing", false, "{}").await;
        let undelegate = run_one("staking/delegation/undelegate/non_existing", false, "{}").await;

        for case in [&delegate, &undelegate] {
            assert!(case.passed(), "{}", describe(case));
            assert_eq!(case.run.transactions.len(), 1);
            assert!(case.run.transactions.iter().all(|tx| !tx.success));
        }
        assert!(refusal(&delegate, "delegate").is_some_and(|error| error.contains("does not exist")));
        assert!(
            refusal(&undelegate, "undelegate").is_some_and(|error| error.contains("does not exist"))
        );
    }

    #[tokio::test]
    async fn undelegating_for_another_account_is_refused() {
        let case = run_one("staking/delegation/undelegate/invalid_address", false, "{}").await;

        assert!(case.passed(), "{}", describe(&case));
        let kinds: Vec<_> = case.run.transactions.iter().map(|tx| tx.kind).collect();
        assert_eq!(kinds, ["create_validator", "delegate", "undelegate"]);
        assert!(
            refusal(&case, "undelegate").is_some_and(|error| error.contains("cannot act as delegator"))
        );
    }
}
