use std::{path::Path, sync::Arc};

use anyhow::{Context as _, Result, bail};
use testing_framework_config::{Amount, Config};
use testing_framework_core::{
    ledger::{RpcClient, RpcSubmitter},
    scenario::RunContext,
};
use testing_framework_ledger_sim::SimLedger;
use tracing::info;

use crate::wallet::CliWallet;

/// Balance the simulated funding account starts with on every funding shard.
pub const DEMO_FUNDS: Amount = Amount::from_whole(1_000_000);

/// Wires the collaborators selected by `network.mode`: `api` talks JSON-RPC
/// to the configured endpoints and signs through `wallet_program`, `sim` runs
/// against an in-memory ledger.
pub fn build_context(config: &Config, wallet_program: &Path) -> Result<RunContext> {
    match config.network.mode.as_str() {
        "api" => {
            let client =
                RpcClient::from_endpoints(&config.network.endpoints, config.network.timeout())
                    .context("invalid network endpoints")?;
            let client = Arc::new(client);
            let wallet = CliWallet::new(wallet_program, &config.account.passphrase);
            info!(
                network = %config.network.name,
                shards = config.network.endpoints.len(),
                wallet = %wallet_program.display(),
                "using live network"
            );
            let submitter = Arc::new(RpcSubmitter::new(client.clone(), wallet.clone()));
            Ok(RunContext::new(config, client, submitter, Arc::new(wallet)))
        }
        "sim" => {
            let ledger = config
                .funding
                .shards
                .iter()
                .fold(SimLedger::default(), |ledger, shard| {
                    ledger.with_funds(&config.funding.account.address, *shard, DEMO_FUNDS)
                });
            info!(network = %config.network.name, funds = %DEMO_FUNDS, "using simulated ledger");
            let ledger = Arc::new(ledger);
            Ok(RunContext::new(config, ledger.clone(), ledger.clone(), ledger))
        }
        other => bail!("unsupported network mode `{other}` (expected `api` or `sim`)"),
    }
}
