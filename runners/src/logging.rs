use testing_framework_env as tf_env;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins; otherwise the level is
/// `info`, or `debug` when `verbose` is set.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tf_env::rust_log()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
