use std::{env, time::Duration};

use testing_framework_env as tf_env;

pub const EPOCH_POLL_INTERVAL_SECS: u64 = 20;
pub const EPOCH_WAIT_CEILING_SECS: u64 = 330;
pub const EPOCH_CAPTURE_ATTEMPTS: u32 = 5;
pub const RECEIPT_POLL_INTERVAL_SECS: u64 = 1;

fn env_duration(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

pub fn epoch_poll_interval() -> Duration {
    env_duration("HARNESS_EPOCH_POLL_SECS", EPOCH_POLL_INTERVAL_SECS)
}

/// Upper bound for the next-epoch wait. `None` keeps polling until the epoch
/// advances.
pub fn epoch_wait_ceiling() -> Option<Duration> {
    match tf_env::harness_epoch_wait_ceiling_secs() {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(Duration::from_secs(EPOCH_WAIT_CEILING_SECS)),
    }
}

pub fn receipt_poll_interval() -> Duration {
    env_duration("HARNESS_RECEIPT_POLL_SECS", RECEIPT_POLL_INTERVAL_SECS)
}
