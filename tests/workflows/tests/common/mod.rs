use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use tempfile::TempDir;
use testing_framework_config::{Amount, Config};
use testing_framework_core::scenario::RunContext;
use testing_framework_ledger_sim::SimLedger;

pub const SEED_FUNDS: Amount = Amount::from_whole(1_000_000);

pub fn demos_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

/// The demo configuration, pointed at `testcases` and `export`.
pub fn demo_config(testcases: PathBuf, export: PathBuf) -> Result<Config> {
    let path = demos_dir().join("config.yaml");
    let mut config = Config::load_from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.framework.testcases = testcases;
    config.export.path = export;
    Ok(config)
}

/// Simulated ledger with the funding account seeded on every funding shard.
pub fn seeded_ledger(config: &Config) -> Arc<SimLedger> {
    let ledger = config
        .funding
        .shards
        .iter()
        .fold(SimLedger::default(), |ledger, shard| {
            ledger.with_funds(&config.funding.account.address, *shard, SEED_FUNDS)
        });
    Arc::new(ledger)
}

pub fn context(config: &Config, ledger: &Arc<SimLedger>) -> RunContext {
    RunContext::new(config, ledger.clone(), ledger.clone(), ledger.clone())
}

/// A scratch directory holding one test case file and an export directory.
pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn with_cases(yaml: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let cases = dir.path().join("cases");
        fs::create_dir_all(&cases)?;
        fs::write(cases.join("cases.yaml"), yaml)?;
        let config = demo_config(cases, dir.path().join("export"))?;
        Ok(Self { dir, config })
    }
}
