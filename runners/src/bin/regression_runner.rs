use std::{path::PathBuf, process};

use anyhow::{Context as _, Result};
use clap::Parser;
use runner_examples::{build_context, init_tracing};
use testing_framework_config::Config;
use testing_framework_core::report::export::exporter_for;
use testing_framework_env as tf_env;
use testing_framework_workflows::{load_test_cases, run_suite};
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "config.yaml";
const DEFAULT_WALLET: &str = "harness-wallet";

#[derive(Parser, Debug)]
#[command(about = "Runs declarative regression test cases against a sharded ledger")]
struct Args {
    /// Harness configuration file. Falls back to `HARNESS_CONFIG`.
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Directory of test case files, overriding `framework.testcases`.
    #[arg(long)]
    testcases: Option<PathBuf>,
    /// Wallet program used for keys and signing against a live network.
    #[arg(long, default_value = DEFAULT_WALLET)]
    wallet: PathBuf,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args);
    init_tracing(args.verbose || config.as_ref().is_ok_and(|config| config.framework.verbose));

    let outcome = match config {
        Ok(config) => run(&args, config).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            error!("regression run failed: {err:#}");
            process::exit(2);
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args
        .config
        .clone()
        .or_else(tf_env::harness_config_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::load_from_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    if let Some(dir) = &args.testcases {
        config.framework.testcases.clone_from(dir);
    }
    Ok(config)
}

/// Runs the suite and reports whether every executed case passed.
async fn run(args: &Args, config: Config) -> Result<bool> {
    let ctx = build_context(&config, &args.wallet)?;
    let cases = load_test_cases(&config).context("loading test cases failed")?;
    info!(
        identifier = %config.framework.identifier,
        network = %config.network.name,
        cases = cases.len(),
        "starting regression run"
    );

    let report = run_suite(&ctx, cases).await.context("suite did not run")?;
    println!("{report}");

    match exporter_for(&config.export).export(&report) {
        Ok(Some(path)) => println!("Results exported to {}", path.display()),
        Ok(None) => {}
        Err(err) => warn!(%err, "failed to export results"),
    }

    Ok(report.is_success())
}
