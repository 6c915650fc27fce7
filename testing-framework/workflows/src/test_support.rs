use std::sync::Arc;

use testing_framework_config::{
    Amount, Config, RetryConfig, config::EpochWaitConfig, testcase::TestCaseSpec,
};
use testing_framework_core::scenario::{RunContext, TestCase};
use testing_framework_ledger_sim::SimLedger;

pub const FUNDING: &str = "one1funding";

/// Config tuned for the simulated ledger: no endpoints and no waits.
pub fn config() -> Config {
    let retry = RetryConfig {
        attempts: 3,
        wait_secs: 0,
    };
    let mut config = Config::default();
    config.framework.identifier = "unit".to_owned();
    config.network.mode = "sim".to_owned();
    config.network.retry = retry;
    config.network.balance_retry = retry;
    config.network.epoch_wait = EpochWaitConfig {
        interval_secs: 0,
        ceiling_secs: None,
    };
    config.funding.account.address = FUNDING.to_owned();
    config.funding.retry = retry;
    config.funding.shards = vec![0, 1];
    config
}

pub fn ledger() -> Arc<SimLedger> {
    Arc::new(
        SimLedger::default()
            .with_funds(FUNDING, 0, Amount::from_whole(1_000_000))
            .with_funds(FUNDING, 1, Amount::from_whole(1_000_000)),
    )
}

pub fn context(config: &Config, ledger: &Arc<SimLedger>) -> RunContext {
    RunContext::new(config, ledger.clone(), ledger.clone(), ledger.clone())
}

pub fn case(name: &str, scenario: &str, expected: bool, parameters: &str) -> TestCase {
    TestCase::from_spec(TestCaseSpec {
        name: name.to_owned(),
        scenario: scenario.to_owned(),
        execute: true,
        expected,
        parameters: serde_yaml::from_str(parameters).expect("valid yaml"),
    })
}
